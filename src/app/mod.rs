// 应用核心模块

mod core;

pub use self::core::{App, OutputFactory};
