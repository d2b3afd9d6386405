#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

//---------------------------------------------------------------------------------------------------- Public API
#[cfg(feature = "asynch")]
pub mod asynch; // async collides

#[cfg(feature = "cast")]
pub mod cast;

#[cfg(feature = "fs")]
pub mod fs;

pub mod network;

#[cfg(feature = "time")]
pub mod time;

//----------------------------------------------------------------------------------------------------
