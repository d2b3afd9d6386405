/// A macro for config structs defined in `cinderd`. This macro generates a function that
/// can insert toml comments created from doc comments on fields.
///
/// # Attributes
/// - `#[child = true]`: writes the doc comments for all fields in the child struct.
/// - `#[inline = true]`: inlines the struct into `{}` instead of having a separate `[]` header.
/// - `#[comment_out = true]`: comments out the field.
///
/// # Invariants
/// Required for this macro to work:
///
/// - struct must implement [`Default`] and `serde`
/// - None of the fields can be [`Option`]
///
/// # Documentation
/// Fields are documented like this:
///
/// ```rust
/// struct Config {
///     /// BRIEF DESCRIPTION.
///     ///
///     /// (optional) LONGER DESCRIPTION.
///     ///
///     /// Type         | (optional) FIELD TYPE
///     /// Valid values | EXPRESSION REPRESENTING VALID VALUES
///     /// Examples     | (optional) A FEW EXAMPLE VALUES
///     field: (),
/// }
/// ```
///
/// Keep documentation lines under ~70 characters, they end up in the generated config file.
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[child = $child:literal])?
                $(#[inline = $inline:literal])?
                $(#[comment_out = $comment_out:literal])?
                $(#[doc = $doc:expr])*
                $(##[$field_meta:meta])*
                pub $field:ident: $field_ty:ty,
            )*
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $(
                $(#[doc = $doc])*
                $(#[$field_meta])*
                pub $field: $field_ty,
            )*
        }

        impl $name {
            /// Writes the field docs of this struct as comments into `doc`.
            ///
            /// `doc` must hold a serialized [`Self`].
            #[allow(unused_labels, clippy::allow_attributes)]
            pub fn write_docs(doc: &mut dyn ::toml_edit::TableLike) {
                $(
                    'write_field: {
                        let key_str = &stringify!($field);

                        let mut field_prefix = [ $(
                          format!("##{}\n", $doc),
                        )*].concat();

                        $(
                        if $comment_out {
                            field_prefix.push('#');
                        }
                        )?

                        $(
                        if $child {
                            let child = doc
                                .get_key_value_mut(key_str)
                                .and_then(|(_, item)| item.as_table_like_mut())
                                .expect("child fields serialize to tables");
                            <$field_ty>::write_docs(child);
                        }
                        )?

                        let Some(item) = doc.get_mut(key_str) else {
                            break 'write_field;
                        };

                        if let Some(table) = item.as_table_mut() {
                            $(
                                if $inline {
                                    let table = table.clone().into_inline_table();
                                    doc.insert(key_str, ::toml_edit::Item::Value(::toml_edit::Value::InlineTable(table)));
                                    if let Some(mut key) = doc.key_mut(key_str) {
                                        key.leaf_decor_mut().set_prefix(field_prefix);
                                    }
                                    break 'write_field;
                                }
                            )?
                            table.decor_mut().set_prefix(format!("\n{field_prefix}"));
                        } else if let Some(mut key) = doc.key_mut(key_str) {
                            key.leaf_decor_mut().set_prefix(field_prefix);
                        }
                    }
                )*
            }
        }
    };
}

pub(crate) use config_struct;
