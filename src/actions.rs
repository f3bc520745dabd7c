use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use std::process::Command;

use crate::config::{self, Backend, DesktopTool, Output, Screen};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl std::str::FromStr for MouseButton {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(anyhow!("unknown mouse button: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopDirection {
    Next,
    Previous,
}

impl std::str::FromStr for DesktopDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "next" => Ok(DesktopDirection::Next),
            "previous" | "prev" => Ok(DesktopDirection::Previous),
            other => Err(anyhow!("unknown desktop direction: {other}")),
        }
    }
}

/// Where the pipeline's commands end up. Fire and forget: backends log their
/// own failures.
pub trait InputSink {
    /// Absolute position, already clamped to the screen.
    fn move_cursor(&mut self, x: i32, y: i32);
    fn click(&mut self, button: MouseButton);
    fn drag_start(&mut self);
    fn drag_end(&mut self);
    /// Positive scrolls up.
    fn scroll(&mut self, amount: i32);
    fn switch_desktop(&mut self, direction: DesktopDirection);
}

impl<T: InputSink + ?Sized> InputSink for Box<T> {
    fn move_cursor(&mut self, x: i32, y: i32) {
        (**self).move_cursor(x, y)
    }
    fn click(&mut self, button: MouseButton) {
        (**self).click(button)
    }
    fn drag_start(&mut self) {
        (**self).drag_start()
    }
    fn drag_end(&mut self) {
        (**self).drag_end()
    }
    fn scroll(&mut self, amount: i32) {
        (**self).scroll(amount)
    }
    fn switch_desktop(&mut self, direction: DesktopDirection) {
        (**self).switch_desktop(direction)
    }
}

pub fn build_sink(output: &Output, screen: &Screen, force_noop: bool) -> Box<dyn InputSink> {
    let desktop = DesktopSwitcher::detect(output.desktop_tool);
    if force_noop || output.backend == Backend::Noop {
        info!("output: no-op backend");
        return Box::new(NoopSink::new(desktop));
    }
    match UinputSink::new(screen) {
        Ok(sink) => Box::new(sink.with_desktop(desktop)),
        Err(e) => {
            warn!("uinput not available ({e}); running in NO-OP mode");
            Box::new(NoopSink::new(desktop))
        }
    }
}

pub struct UinputSink {
    dev: VirtualPointer,
    desktop: DesktopSwitcher,
    // last absolute position sent; uinput only moves relatively
    cur_x: i32,
    cur_y: i32,
}

impl UinputSink {
    pub fn new(screen: &Screen) -> Result<Self> {
        Ok(Self {
            dev: VirtualPointer::create()?,
            desktop: DesktopSwitcher { tool: None },
            cur_x: (screen.width / 2) as i32,
            cur_y: (screen.height / 2) as i32,
        })
    }

    pub fn with_desktop(mut self, desktop: DesktopSwitcher) -> Self {
        self.desktop = desktop;
        self
    }

    fn with_device(&mut self, what: &str, f: impl FnOnce(&mut VirtualPointer) -> Result<()>) {
        if let Err(e) = f(&mut self.dev) {
            error!("uinput {what} failed: {e}");
        }
    }
}

impl InputSink for UinputSink {
    fn move_cursor(&mut self, x: i32, y: i32) {
        let (dx, dy) = (x - self.cur_x, y - self.cur_y);
        self.cur_x = x;
        self.cur_y = y;
        if dx != 0 || dy != 0 {
            self.with_device("move", |d| d.move_rel(dx, dy));
        }
    }

    fn click(&mut self, button: MouseButton) {
        self.with_device("click", |d| d.click(button));
        debug!("{button:?} click via uinput");
    }

    fn drag_start(&mut self) {
        self.with_device("drag_start", |d| d.button(MouseButton::Left, 1));
        debug!("drag started via uinput");
    }

    fn drag_end(&mut self) {
        self.with_device("drag_end", |d| d.button(MouseButton::Left, 0));
        debug!("drag ended via uinput");
    }

    fn scroll(&mut self, amount: i32) {
        self.with_device("scroll", |d| d.scroll_vertical(amount));
    }

    fn switch_desktop(&mut self, direction: DesktopDirection) {
        self.desktop.switch_logged(direction);
    }
}

/// Logs commands and does nothing else.
pub struct NoopSink {
    desktop: DesktopSwitcher,
}

impl NoopSink {
    pub fn new(desktop: DesktopSwitcher) -> Self {
        Self { desktop }
    }
}

impl InputSink for NoopSink {
    fn move_cursor(&mut self, x: i32, y: i32) {
        debug!("noop: move {x},{y}");
    }
    fn click(&mut self, button: MouseButton) {
        debug!("noop: click {button:?}");
    }
    fn drag_start(&mut self) {
        debug!("noop: drag start");
    }
    fn drag_end(&mut self) {
        debug!("noop: drag end");
    }
    fn scroll(&mut self, amount: i32) {
        debug!("noop: scroll {amount}");
    }
    fn switch_desktop(&mut self, direction: DesktopDirection) {
        debug!("noop: switch desktop {direction:?} (tool {:?})", self.desktop.tool);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchTool {
    Wmctrl,
    Xdotool,
}

/// Virtual desktop switching through wmctrl or xdotool.
#[derive(Debug, Clone)]
pub struct DesktopSwitcher {
    tool: Option<SwitchTool>,
}

impl DesktopSwitcher {
    pub fn detect(pref: DesktopTool) -> Self {
        let tool = match pref {
            DesktopTool::None => None,
            DesktopTool::Wmctrl => Some(SwitchTool::Wmctrl),
            DesktopTool::Xdotool => Some(SwitchTool::Xdotool),
            DesktopTool::Auto => {
                if config::command_exists("wmctrl") {
                    Some(SwitchTool::Wmctrl)
                } else if config::command_exists("xdotool") {
                    Some(SwitchTool::Xdotool)
                } else {
                    None
                }
            }
        };
        match tool {
            Some(t) => info!("desktop switching via {t:?}"),
            None => warn!("no desktop switching tool; install wmctrl or xdotool"),
        }
        Self { tool }
    }

    pub fn switch_logged(&self, direction: DesktopDirection) {
        match self.switch(direction) {
            Ok(Some((from, to))) => info!("switched to desktop {to} (was {from})"),
            Ok(None) => warn!("no desktop switching tool available"),
            Err(e) => error!("desktop switch failed: {e}"),
        }
    }

    /// Returns (from, to) on success.
    pub fn switch(&self, direction: DesktopDirection) -> Result<Option<(usize, usize)>> {
        let Some(tool) = self.tool else {
            return Ok(None);
        };
        let (current, total) = match tool {
            SwitchTool::Wmctrl => parse_wmctrl_desktops(&run_capture("wmctrl", &["-d"])?)
                .ok_or_else(|| anyhow!("could not determine current desktop"))?,
            SwitchTool::Xdotool => {
                let current = run_capture("xdotool", &["get_desktop"])?.trim().parse()?;
                let total = run_capture("xdotool", &["get_num_desktops"])?.trim().parse()?;
                (current, total)
            }
        };
        let target = wrap_desktop(current, total, direction)
            .ok_or_else(|| anyhow!("no desktops reported"))?;
        let target_s = target.to_string();
        match tool {
            SwitchTool::Wmctrl => run_capture("wmctrl", &["-s", &target_s])?,
            SwitchTool::Xdotool => run_capture("xdotool", &["set_desktop", &target_s])?,
        };
        Ok(Some((current, target)))
    }
}

fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    let out = Command::new(cmd).args(args).output()?;
    if !out.status.success() {
        return Err(anyhow!(
            "{cmd} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// `wmctrl -d` lists one desktop per line, the current one marked `*`.
fn parse_wmctrl_desktops(listing: &str) -> Option<(usize, usize)> {
    let mut current = None;
    let mut total = 0;
    for line in listing.lines() {
        let parts: Vec<_> = line.split_whitespace().collect();
        if parts.len() > 1 {
            if parts[1].contains('*') {
                current = parts[0].parse().ok();
            }
            total += 1;
        }
    }
    current.filter(|_| total > 0).map(|c| (c, total))
}

fn wrap_desktop(current: usize, total: usize, direction: DesktopDirection) -> Option<usize> {
    if total == 0 {
        return None;
    }
    Some(match direction {
        DesktopDirection::Next => (current + 1) % total,
        DesktopDirection::Previous => (current + total - 1) % total,
    })
}

struct VirtualPointer {
    dev: uinput::device::Device,
}

impl VirtualPointer {
    fn create() -> Result<Self> {
        use uinput::event::{controller::Mouse, relative};

        let dev = uinput::default()?
            .name("handctl Virtual Pointer")?
            .event(relative::Position::X)?
            .event(relative::Position::Y)?
            .event(relative::Wheel::Vertical)?
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(Mouse::Middle)?
            .create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn move_rel(&mut self, dx: i32, dy: i32) -> Result<()> {
        use uinput::event::relative::Position;
        if dx != 0 {
            self.dev.send(Position::X, dx)?;
        }
        if dy != 0 {
            self.dev.send(Position::Y, dy)?;
        }
        self.sync()
    }

    fn button(&mut self, button: MouseButton, val: i32) -> Result<()> {
        use uinput::event::controller::Mouse;
        let b = match button {
            MouseButton::Left => Mouse::Left,
            MouseButton::Right => Mouse::Right,
            MouseButton::Middle => Mouse::Middle,
        };
        self.dev.send(b, val)?;
        self.sync()
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.button(button, 1)?;
        self.button(button, 0)
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wmctrl_listing() {
        let listing = "\
0  - DG: 3840x1080  VP: 0,0  WA: 0,0 1920x1050  Web
1  * DG: 3840x1080  VP: 0,0  WA: 0,0 1920x1050  Code
2  - DG: 3840x1080  VP: 0,0  WA: 0,0 1920x1050  Chat
";
        assert_eq!(parse_wmctrl_desktops(listing), Some((1, 3)));
        assert_eq!(parse_wmctrl_desktops(""), None);
        assert_eq!(parse_wmctrl_desktops("0  - DG: x\n"), None);
    }

    #[test]
    fn desktop_index_wraps_both_ways() {
        assert_eq!(wrap_desktop(2, 3, DesktopDirection::Next), Some(0));
        assert_eq!(wrap_desktop(0, 3, DesktopDirection::Previous), Some(2));
        assert_eq!(wrap_desktop(1, 3, DesktopDirection::Previous), Some(0));
        assert_eq!(wrap_desktop(0, 0, DesktopDirection::Next), None);
    }

    #[test]
    fn parses_buttons_and_directions() {
        assert_eq!("Right".parse::<MouseButton>().unwrap(), MouseButton::Right);
        assert!("fourth".parse::<MouseButton>().is_err());
        assert_eq!("prev".parse::<DesktopDirection>().unwrap(), DesktopDirection::Previous);
        assert_eq!("next".parse::<DesktopDirection>().unwrap(), DesktopDirection::Next);
    }

    #[test]
    fn switcher_without_tool_is_a_no_op() {
        let s = DesktopSwitcher::detect(DesktopTool::None);
        assert_eq!(s.switch(DesktopDirection::Next).unwrap(), None);
    }
}
