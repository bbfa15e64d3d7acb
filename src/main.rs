#[tokio::main]
async fn main() {
    if let Err(e) = section_runtime::run().await {
        eprintln!("section-runtime: {}", e);
        std::process::exit(1);
    }
}
