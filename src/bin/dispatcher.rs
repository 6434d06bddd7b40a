use std::env;
use std::sync::Arc;

use elevdispatch::backup::ExeLauncher;
use elevdispatch::display::TerminalDisplay;
use elevdispatch::init;
use elevdispatch::print;
use elevdispatch::regulator::Regulator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if init::wants_help(&args) {
        println!("{}", init::dispatcher_usage());
        return Ok(());
    }
    let inherited = env::var(init::OPTIONS_ENV).ok();
    let parsed = init::parse_dispatcher_args(&init::with_inherited_options(inherited.as_deref(), &args))?;

    // Backupen får bare porten som argument, opsjonene går via miljøet
    let launcher = ExeLauncher::current(parsed.settings.backup_in_terminal)?
        .with_env(init::OPTIONS_ENV, init::options_for_backup(&parsed));

    let regulator = Regulator::new(
        parsed.settings,
        Arc::new(TerminalDisplay),
        Arc::new(launcher),
        parsed.backup_of,
    );

    if let Err(e) = regulator.run().await {
        print::err(format!("Dispatcher stopped: {:#}", e));
        return Err(e);
    }
    Ok(())
}
