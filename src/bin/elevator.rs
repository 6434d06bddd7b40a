use std::env;

use elevdispatch::elevator_logic;
use elevdispatch::init;
use elevdispatch::print;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if init::wants_help(&args) {
        println!("{}", init::elevator_usage());
        return Ok(());
    }
    let settings = init::parse_elevator_args(&args)?;
    print::info(format!("Elevator connecting to dispatcher at {}", settings.dispatcher_addr));

    elevator_logic::run_local_elevator(settings).await
}
