#![doc = include_str!("../README.md")]

mod error;

pub mod catalog;
pub mod config;
pub mod element;
pub mod engine;
pub mod framing;
pub mod lut;
pub mod position;
pub mod source;
pub mod tracker;
pub mod trigger;

pub use catalog::Catalog;
pub use config::{MissionConfig, Mode, SubcomGroup};
pub use engine::{Engine, EngineHandle, EngineStatus, FrameEvent, Subscription};
pub use error::{Error, Result};
pub use trigger::{Namespace, Target, Trigger};
