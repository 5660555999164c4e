// 应用核心库

// 模块导出
pub mod app;
pub mod audio;
pub mod config;
pub mod editor;
pub mod error;
pub mod lyrics;
pub mod player;
