//! Site Vitals 主程序入口
//!
//! 队列驱动的网站存活与性能监控

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    site_vitals::core::app::main().await
}
