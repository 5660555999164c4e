// 配置模块

mod loader;

pub use loader::{Config, EditorConfig, PlayerConfig, StoreConfig, TimestampConfig};
