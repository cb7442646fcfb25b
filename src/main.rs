#[tokio::main]
async fn main() {
    coursemeter::start_server().await;
}
