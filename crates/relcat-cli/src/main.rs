//! relcat - release catalog client

#[tokio::main]
async fn main() {
    if let Err(e) = relcat_cli::run().await {
        relcat_cli::output::print_error(&e.to_string());
        std::process::exit(1);
    }
}
