mod commands;

use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    let command = match args.get(1) {
        Some(command) => command.as_str(),
        None => fail("specify at least one command"),
    };
    let arg = |idx: usize| required_arg(&args, idx, command);

    let result = match command {
        "true" => Ok(()),
        "echo" => commands::echo(arg(2)),
        "printenv" => commands::printenv(arg(2)),
        "groups" => commands::groups(),
        "cat" => commands::cat(arg(2)),
        "open" => commands::open(arg(2)),
        "access" => commands::access(arg(2)),
        "cwd" => commands::cwd(),
        "gethostname" => commands::hostname(),
        "isatty" => commands::isatty(arg(2)),
        "write" => commands::write(arg(2), arg(3)),
        "ls" => commands::ls(arg(2)),
        "pause" => commands::pause(),
        unknown => fail(&format!("unknown command '{unknown}' specified")),
    };

    if let Err(e) = result {
        fail(&format!("{e:#}"));
    }
}

fn required_arg<'a>(args: &'a [String], idx: usize, command: &str) -> &'a str {
    match args.get(idx) {
        Some(a) => a.as_str(),
        None => fail(&format!("'{command}' requires an argument")),
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("init: {msg}");
    std::process::exit(1);
}
