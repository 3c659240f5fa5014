use timberline::runtime::{boot, init_logging, run};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let verbose = std::env::var("TIMBERLINE_VERBOSE").is_ok_and(|v| v == "true" || v == "1");
    let silent = std::env::var("TIMBERLINE_SILENT").is_ok_and(|v| v == "true" || v == "1");
    init_logging(verbose, silent);

    let app = boot()?;
    run(app).await?;
    Ok(())
}
