//! Global `static`s used throughout `cinderd`.

use std::{sync::LazyLock, time::Instant};

/// Define all the `static`s that should be always be initialized early on.
///
/// This wraps all `static`s inside a `LazyLock` and generates
/// a [`init_lazylock_statics`] function that `main()` calls first.
macro_rules! define_init_lazylock_statics {
    ($(
        $( #[$attr:meta] )*
        $name:ident: $t:ty = $init_fn:expr;
    )*) => {
        /// Initialize global static `LazyLock` data.
        pub fn init_lazylock_statics() {
            $(
                LazyLock::force(&$name);
            )*
        }

        $(
            $(#[$attr])*
            pub static $name: LazyLock<$t> = LazyLock::new(|| $init_fn);
        )*
    };
}

define_init_lazylock_statics! {
    /// The start time of `cinderd`.
    START_INSTANT: Instant = Instant::now();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uptime_grows() {
        init_lazylock_statics();
        let first = START_INSTANT.elapsed();
        assert!(START_INSTANT.elapsed() >= first);
    }
}
