//! ## Printing Module
//!
//! This module is only here to make logging in the terminal easier to read.
//! It allows to print in appropriate colors depending on the situation.
//! It also provides a print-format for the dispatcher's fleet.
use crate::config;
use ansi_term::Colour::{self, Green, Red, Yellow, Purple, White};
use prettytable::{format, row, Table};
use std::sync::Mutex;
use unicode_width::UnicodeWidthStr;

/// Reads a print toggle. A poisoned toggle prints rather than hides.
fn enabled(flag: &Mutex<bool>) -> bool {
    flag.lock().map(|on| *on).unwrap_or(true)
}

/// Prints an error message in red to the terminal.
///
/// If `PRINT_ERR_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[ERROR\]:   {}", msg
///
/// ## Example
/// ```
/// use elevdispatch::print;
///
/// print::err("Something went wrong!".to_string());
/// ```
pub fn err(msg: String) {
    if enabled(&config::PRINT_ERR_ON) {
        println!("{}{}\n", Red.paint("[ERROR]:   "), Red.paint(msg));
    }
}

/// Prints a warning message in yellow to the terminal.
///
/// If `PRINT_WARN_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[WARNING\]: {}", msg
pub fn warn(msg: String) {
    if enabled(&config::PRINT_WARN_ON) {
        println!("{}{}\n", Yellow.paint("[WARNING]: "), Yellow.paint(msg));
    }
}

/// Prints a success message in green to the terminal.
///
/// If `PRINT_OK_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[OK\]:      {}", msg
pub fn ok(msg: String) {
    if enabled(&config::PRINT_OK_ON) {
        println!("{}{}\n", Green.paint("[OK]:      "), Green.paint(msg));
    }
}

/// Prints an informational message in light blue to the terminal.
///
/// If `PRINT_INFO_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[INFO\]:    {}", msg
pub fn info(msg: String) {
    let light_blue = Colour::RGB(102, 178, 255);
    if enabled(&config::PRINT_INFO_ON) {
        println!("{}{}\n", light_blue.paint("[INFO]:    "), light_blue.paint(msg));
    }
}

/// Prints a dispatcher event in pink to the terminal.
///
/// Used for everything the coordinator decides: assignments, redistribution,
/// role changes. If `PRINT_ELSE_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[DISPATCH\]: {}", msg
pub fn dispatch(msg: String) {
    let pink = Colour::RGB(255, 51, 255);
    if enabled(&config::PRINT_ELSE_ON) {
        println!("{}{}\n", pink.paint("[DISPATCH]: "), pink.paint(msg));
    }
}

/// Prints an elevator-side event in orange to the terminal.
///
/// If `PRINT_ELSE_ON` is `false`, the message will not be printed.
///
/// ## Terminal output
/// - "\[ELEVATOR\]: {}", msg
pub fn elevator(msg: String) {
    let orange = Colour::RGB(204, 102, 0);
    if enabled(&config::PRINT_ELSE_ON) {
        println!("{}{}\n", orange.paint("[ELEVATOR]: "), orange.paint(msg));
    }
}

/// Prints an error message with a cosmic twist, displaying the message in a rainbow of colors.
///
/// This function prints a message when something happens that is theoretically impossible,
/// such as a "cosmic ray flipping a bit" scenario.
///
/// # Parameters
/// - `fun`: The function name or description of the issue that led to this cosmic error.
pub fn cosmic_err(fun: String) {
    print!("{}", Colour::Red.paint("[ERROR]: "));

    let colors = [
        Colour::Red,
        Colour::Yellow,
        Colour::Green,
        Colour::Cyan,
        Colour::Blue,
        Colour::Purple,
    ];

    let message = format!("Cosmic rays flipped a bit! 👽 ⚛️ 🔄 1️⃣ 0️⃣  IN: {}", fun);
    for (i, c) in message.chars().enumerate() {
        let color = colors[i % colors.len()];
        print!("{}", color.paint(c.to_string()));
    }

    println!();
}

/// Pads the input text to a fixed display width using spaces.
///
/// Accounts for characters that may take more than one column width (e.g. Unicode symbols),
/// ensuring aligned text in terminal-based boxes.
fn pad_text(text: &str, width: usize) -> String {
    let visible_width = UnicodeWidthStr::width(text);
    let padding = width.saturating_sub(visible_width);
    format!("{}{}", text, " ".repeat(padding))
}

/// One line in the fleet table.
#[derive(Debug, Clone)]
pub struct FleetRow {
    /// Session id, assigned in accept order
    pub id: u64,
    /// Peer address of the elevator
    pub peer: String,
    /// Last reported direction, or `None` when the status is unknown
    pub direction: Option<String>,
    /// Last reported floor, or `None` when the status is unknown
    pub floor: Option<i32>,
    /// Orders assigned to the car and not yet served
    pub outstanding: Vec<String>,
}

/// Prints the dispatcher's fleet as a table.
///
/// ## Parameters
/// - `title`: Shown in the header box, usually the role and listen address.
/// - `rows`: One row per connected elevator.
///
/// If `PRINT_FLEET_ON` is `false`, nothing is printed.
pub fn fleet(title: &str, rows: &[FleetRow]) {
    if !enabled(&config::PRINT_FLEET_ON) {
        return;
    }

    println!("{}", Purple.bold().paint("┌────────────────────────────────────┐"));
    println!("{}", Purple.bold().paint(format!("│ {} │", pad_text(title, 34))));
    println!("{}", Purple.bold().paint("└────────────────────────────────────┘"));

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(row![bFw => "ID", "Peer", "Dirn", "Floor", "Outstanding"]);

    for r in rows {
        let dirn = match &r.direction {
            Some(d) => d.clone(),
            None => Yellow.paint("?").to_string(),
        };
        let floor = match r.floor {
            Some(f) => f.to_string(),
            None => Red.paint("unknown").to_string(),
        };
        let outstanding = if r.outstanding.is_empty() {
            Green.paint("-").to_string()
        } else {
            r.outstanding.join(", ")
        };
        table.add_row(row![r.id, r.peer, dirn, floor, outstanding]);
    }

    table.printstd();
    println!("{}", White.dimmed().paint(format!("{} elevator(s) connected", rows.len())));
}
