//! 浏览器连接：连接已有浏览器或启动无头浏览器

mod connection;
mod headless;

pub use connection::connect_to_browser_and_page;
pub use headless::launch_headless_browser;
