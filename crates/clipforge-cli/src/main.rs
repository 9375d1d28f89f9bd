//! Binary entrypoint that delegates to `clipforge_cli::run`.

#[tokio::main]
async fn main() {
    let exit_code = clipforge_cli::run().await;
    std::process::exit(exit_code);
}
