mod actions;
mod cli;
mod config;
mod daemon;
mod gestures;
mod hand;
mod input;
mod logging;
mod pipeline;
mod selector;
mod smoother;
mod velocity;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
