#[tokio::main]
async fn main() {
    if let Err(e) = carepath_lib::run().await {
        eprintln!("carepath: {e}");
        std::process::exit(1);
    }
}
