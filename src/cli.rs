use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, path::PathBuf};

use crate::actions::{self, DesktopDirection, InputSink, MouseButton};
use crate::config::{Backend, ConfigState, Profile};
use crate::daemon::{self, RunOptions};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains(["-h", "--help"]) {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("run") => {
            let opts = RunOptions {
                config: pargs.opt_value_from_os_str("--config", parse_path)?,
                frames: pargs.opt_value_from_os_str("--frames", parse_path)?,
                noop: pargs.contains("--noop"),
            };
            reject_leftovers(pargs)?;
            daemon::run_daemon(opts)
        }

        Some("list") => {
            let st = ConfigState::load_or_install_default()?;
            for name in st.list_profiles() {
                let mark = if name == st.active_name { '*' } else { ' ' };
                println!("{mark} {name}");
            }
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl use <profile_name>"))?;
            let mut st = ConfigState::load_or_install_default()?;
            st.set_active(&name)?;
            println!("handctl: active profile is now '{}'", st.active_name);
            Ok(())
        }

        Some("config") => {
            let path: Option<PathBuf> = pargs.opt_value_from_os_str("--config", parse_path)?;
            let profile = match path {
                Some(p) => Profile::load(&p)?,
                None => ConfigState::load_or_install_default()?.profile,
            };
            print_json(&serde_json::to_value(&profile)?);
            Ok(())
        }

        Some("doctor") => {
            let st = ConfigState::load_or_install_default()?;
            print_json(&st.doctor_report());
            Ok(())
        }

        Some("emit") => emit(pargs),

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn emit(mut pargs: Arguments) -> Result<()> {
    // usage:
    //   handctl emit click right
    //   handctl emit scroll 3
    //   handctl emit desktop next
    //   handctl emit move 960 540
    let what: String = pargs
        .free_from_str()
        .map_err(|_| anyhow!("usage: handctl emit <click|scroll|desktop|move> ..."))?;

    let profile = ConfigState::load_or_install_default()?.profile;
    let mut output = profile.output.clone();
    output.backend = Backend::Uinput;
    let mut sink = actions::build_sink(&output, &profile.screen, false);

    match what.as_str() {
        "click" => {
            let btn: MouseButton = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit click <left|right|middle>"))?;
            sink.click(btn);
            println!("ok: clicked {btn:?}");
        }
        "scroll" => {
            let steps: i32 = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit scroll <steps>"))?;
            sink.scroll(steps);
            println!("ok: scrolled vertical {steps}");
        }
        "desktop" => {
            let dir: DesktopDirection = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit desktop <next|previous>"))?;
            sink.switch_desktop(dir);
            println!("ok: desktop {dir:?}");
        }
        "move" => {
            let usage = || anyhow!("usage: handctl emit move <x> <y>");
            let x: i32 = pargs.free_from_str().map_err(|_| usage())?;
            let y: i32 = pargs.free_from_str().map_err(|_| usage())?;
            let (x, y) = (
                x.clamp(0, profile.screen.width.saturating_sub(1) as i32),
                y.clamp(0, profile.screen.height.saturating_sub(1) as i32),
            );
            sink.move_cursor(x, y);
            println!("ok: moved to {x},{y}");
        }
        other => return Err(anyhow!("unknown emit kind: {other}")),
    }
    Ok(())
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(PathBuf::from(s))
}

fn reject_leftovers(pargs: Arguments) -> Result<()> {
    let rest = pargs.finish();
    if rest.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("unexpected arguments: {rest:?}"))
    }
}

fn print_help() {
    println!(
        r#"handctl: drive the pointer with hand landmarks

USAGE:
  handctl help [command]                   Show general or command-specific help
  handctl run [--config <file>] [--frames <file>] [--noop]
                                           Run the frame loop (frames from stdin by default)
  handctl list                             List profiles
  handctl use <name>                       Switch active profile
  handctl config [--config <file>]         Print the resolved profile as JSON
  handctl doctor                           Diagnose permissions and tools
  handctl emit click <left|right|middle>   Emit a mouse click
  handctl emit scroll <steps>              Emit vertical scroll (+/- steps)
  handctl emit desktop <next|previous>     Switch virtual desktop
  handctl emit move <x> <y>                Move the pointer to a screen position

TIPS:
  - Frames: one JSON object per line, {{"t_ms": 33, "hands": [{{"id": 0, "landmarks": [[x, y, z], ...]}}]}}
  - Profiles: ~/.config/handctl/profiles
  - Active profile pointer: ~/.config/handctl/active
  - Log level: HANDCTL_LOG=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "run" => println!(
            "usage: handctl run [--config <file>] [--frames <file>] [--noop]\nReads landmark frames and drives the pointer until the stream ends or SIGINT/SIGTERM.\nProfile edits are picked up while running; a bad edit keeps the last good profile."
        ),
        "list" => {
            println!("usage: handctl list\nLists available profiles; marks active with '*'.")
        }
        "use" => println!(
            "usage: handctl use <name>\nSwitches active profile to <name>; a running loop follows."
        ),
        "config" => println!(
            "usage: handctl config [--config <file>]\nPrints the active (or given) profile with defaults filled in."
        ),
        "doctor" => println!(
            "usage: handctl doctor\nChecks /dev/uinput access, input group membership and desktop tools."
        ),
        "emit" => println!(
            "usage:\n  handctl emit click <left|right|middle>\n  handctl emit scroll <steps>\n  handctl emit desktop <next|previous>\n  handctl emit move <x> <y>"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_json(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
