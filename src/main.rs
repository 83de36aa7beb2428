use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;

use jbod_console::stats::StatsPrinter;
use jbod_console::{Console, ConsoleEvent, ControlChar, Jbod, jbod};

mod cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cli::Cli::parse();
    match args.cmd {
        cli::Cmd::Monitor(opts) => monitor(opts),
        cli::Cmd::Send(opts) => send(opts),
        cli::Cmd::Discover(opts) => discover(opts),
        cli::Cmd::Pwm(opts) => {
            let console = connect(&opts.ser)?;
            let set = Jbod::new(console.clone(), opts.id)
                .set_pwm(opts.fan, opts.value)
                .with_context(|| format!("setting pwm on jbod/{} fan/{}", opts.id, opts.fan))?;
            println!("{set}");
            console.close();
            Ok(())
        }
        cli::Cmd::Rpm(opts) => {
            let console = connect(&opts.ser)?;
            let rpm = Jbod::new(console.clone(), opts.id)
                .rpm(opts.fan)
                .with_context(|| format!("reading rpm of jbod/{} fan/{}", opts.id, opts.fan))?;
            println!("{rpm}");
            console.close();
            Ok(())
        }
        cli::Cmd::Status(opts) => {
            let console = connect(&opts.ser)?;
            let psu = Jbod::new(console.clone(), opts.id)
                .psu_status()
                .with_context(|| format!("reading psu status of jbod/{}", opts.id))?;
            println!("{psu}");
            console.close();
            Ok(())
        }
    }
}

fn connect(ser: &cli::SerialOpts) -> Result<Console> {
    let console = Console::open(ser.settings())
        .with_context(|| format!("opening console on {}", ser.dev))?;
    console.start().context("starting console")?;
    Ok(console)
}

fn monitor(opts: cli::MonitorOpts) -> Result<()> {
    let poll = cli::Poll::from_cli(&opts.poll)?;
    let console = connect(&opts.ser)?;
    console.set_callback(|_, frame| ConsoleEvent::from_frame(&frame).log());
    log::info!("monitoring {} (poll {:?})", opts.ser.dev, poll);

    let mut printer = StatsPrinter::new(opts.stats);
    let mut next_poll = Instant::now();
    while console.is_alive() {
        if let cli::Poll::Every(every) = poll
            && Instant::now() >= next_poll
        {
            if let Err(e) = console.try_transmit_control(ControlChar::Dc2) {
                log::warn!("telemetry poll not sent: {}", e);
            }
            next_poll = Instant::now() + every;
        }
        printer.maybe_print(console.stats());
        thread::sleep(Duration::from_millis(100));
    }
    let state = console.state();
    console.close();
    bail!("console stopped ({state:?})")
}

fn send(opts: cli::SendOpts) -> Result<()> {
    let console = connect(&opts.ser)?;
    let args: Vec<&dyn Display> = opts.args.iter().map(|a| a as &dyn Display).collect();
    let frame = console
        .command_write(opts.command, &args)
        .with_context(|| format!("{} {:?}", opts.command.name(), opts.args))?;
    println!("{}", frame.payload());
    console.close();
    Ok(())
}

fn discover(opts: cli::DiscoverOpts) -> Result<()> {
    let console = connect(&opts.ser)?;
    let found = jbod::discover(&console, opts.start, opts.id).context("discovery")?;
    if found.is_empty() {
        log::warn!("no controllers answered");
    }
    for (id, ident) in &found {
        let fw = Jbod::new(console.clone(), *id)
            .firmware_version()
            .unwrap_or_else(|e| format!("? ({e})"));
        println!("jbod/{id}\t{}\t{fw}", ident.device_id);
    }
    console.close();
    Ok(())
}
