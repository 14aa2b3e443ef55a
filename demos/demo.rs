//! Exercises a registrar end to end: two producers, a grouped subscriber
//! pair, and an optuple join over two channels.

use clap::Parser;
use conduit_bus::{merge2, Registrar};

#[derive(Parser)]
struct Args {
    /// Enable the bus's debug trace on every channel.
    #[arg(long)]
    debug: bool,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let registrar = Registrar::new("demo");
    registrar.set_debug(args.debug);

    let tick = registrar.lookup::<(), ()>("tick", "main");
    tick.subscribe_void(|_| println!("early logger"), "early", -10);
    tick.subscribe_void(|_| println!("late logger"), "late", 10);
    tick.invoke(());

    let position = registrar.lookup::<(i32,), ()>("position", "physics");
    let label = registrar.lookup::<(String,), ()>("label", "ui");

    let joined = merge2::<i32, String, _, fn()>(
        |pos, name| println!("{name} is now at {pos}"),
        None,
        position.clone(),
        label.clone(),
    );

    position.invoke((7,));
    label.invoke(("player-one".to_string(),));

    drop(joined);
}
