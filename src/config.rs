use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub name: Option<String>,
}

/// Frame space the landmarks arrive in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub width: u32,
    pub height: u32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    #[default]
    Slot,
    Centroid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub stability_frames: u32,
    pub identity: Identity,
    /// Centroid identity only (px).
    pub match_radius: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            stability_frames: 5,
            identity: Identity::Slot,
            match_radius: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureThresholds {
    pub pinch_threshold: f64,
    pub pinch_debounce_ms: u64,
    pub swipe_min_distance: f64,
    pub swipe_min_velocity: f64,
    pub swipe_debounce_ms: u64,
    pub zoom_threshold: f64,
    /// Spread beyond `zoom_threshold` per scroll step (px).
    pub zoom_scroll_step: f64,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            pinch_threshold: 40.0,
            pinch_debounce_ms: 200,
            swipe_min_distance: 100.0,
            swipe_min_velocity: 200.0,
            swipe_debounce_ms: 500,
            zoom_threshold: 200.0,
            zoom_scroll_step: 50.0,
        }
    }
}

impl GestureThresholds {
    pub fn pinch_debounce(&self) -> Duration {
        Duration::from_millis(self.pinch_debounce_ms)
    }

    pub fn swipe_debounce(&self) -> Duration {
        Duration::from_millis(self.swipe_debounce_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmootherKind {
    #[default]
    Adaptive,
    Kalman,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherSettings {
    pub kind: SmootherKind,
    pub alpha_base: f64,
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub adaptation_factor: f64,
    pub reference_hand_size: f64,
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl Default for SmootherSettings {
    fn default() -> Self {
        Self {
            kind: SmootherKind::Adaptive,
            alpha_base: 0.3,
            alpha_min: 0.1,
            alpha_max: 0.7,
            adaptation_factor: 0.5,
            reference_hand_size: 150.0,
            process_noise: 0.01,
            measurement_noise: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocitySettings {
    pub gamma: f64,
    pub gain: f64,
    pub min_velocity: f64,
}

impl Default for VelocitySettings {
    fn default() -> Self {
        Self {
            gamma: 0.6,
            gain: 0.0025,
            min_velocity: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Uinput,
    Noop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesktopTool {
    #[default]
    Auto,
    Wmctrl,
    Xdotool,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub backend: Backend,
    pub desktop_tool: DesktopTool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub meta: Meta,
    pub camera: Camera,
    pub screen: Screen,
    pub tracker: TrackerSettings,
    pub gestures: GestureThresholds,
    pub smoother: SmootherSettings,
    pub velocity: VelocitySettings,
    pub output: Output,
}

impl Profile {
    pub fn from_toml(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        Self::from_toml(&txt).map_err(|e| anyhow!("failed to load {}: {e}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct ConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot resolve home directory"))?;
    Ok(dirs.home_dir().join(".config").join("handctl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl ConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_from(config_dir()?)
    }

    pub fn load_from(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = Profile::load(&profdir.join(format!("{active_name}.toml")))?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    /// Re-reads the active pointer and the profile it names. Keeps the last
    /// good profile when the file on disk does not load.
    pub fn reload(&mut self) -> Result<()> {
        let name = fs::read_to_string(&self.active_ptr)?.trim().to_string();
        let profile = Profile::load(&self.profiles_dir.join(format!("{name}.toml")))?;
        self.active_name = name;
        self.profile = profile;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = Profile::load(&p)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "wmctrl": command_exists("wmctrl"),
            "xdotool": command_exists("xdotool"),
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "backend": self.profile.output.backend,
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input",
                "desktop_switching": "install wmctrl or xdotool"
            }
        })
    }
}

pub fn validate_profile(p: &Profile) -> Result<()> {
    if p.camera.width == 0 || p.camera.height == 0 {
        return Err(anyhow!("camera dimensions must be non-zero"));
    }
    if p.screen.width == 0 || p.screen.height == 0 {
        return Err(anyhow!("screen dimensions must be non-zero"));
    }
    if p.tracker.stability_frames == 0 {
        return Err(anyhow!("tracker.stability_frames must be at least 1"));
    }
    if !(p.tracker.match_radius > 0.0) {
        return Err(anyhow!("tracker.match_radius must be positive"));
    }

    let g = &p.gestures;
    for (name, v) in [
        ("pinch_threshold", g.pinch_threshold),
        ("swipe_min_distance", g.swipe_min_distance),
        ("swipe_min_velocity", g.swipe_min_velocity),
        ("zoom_threshold", g.zoom_threshold),
        ("zoom_scroll_step", g.zoom_scroll_step),
    ] {
        if !(v > 0.0) {
            return Err(anyhow!("gestures.{name} must be positive"));
        }
    }

    let s = &p.smoother;
    let alphas_ok = 0.0 < s.alpha_min
        && s.alpha_min <= s.alpha_base
        && s.alpha_base <= s.alpha_max
        && s.alpha_max <= 1.0;
    if !alphas_ok {
        return Err(anyhow!(
            "smoother alphas must satisfy 0 < alpha_min <= alpha_base <= alpha_max <= 1"
        ));
    }
    for (name, v) in [
        ("reference_hand_size", s.reference_hand_size),
        ("process_noise", s.process_noise),
        ("measurement_noise", s.measurement_noise),
    ] {
        if !(v > 0.0) {
            return Err(anyhow!("smoother.{name} must be positive"));
        }
    }
    if !(s.adaptation_factor >= 0.0) {
        return Err(anyhow!("smoother.adaptation_factor must not be negative"));
    }

    let v = &p.velocity;
    if !(v.gamma > 0.0 && v.gain >= 0.0 && v.min_velocity >= 0.0) {
        return Err(anyhow!(
            "velocity.gamma must be positive, gain and min_velocity non-negative"
        ));
    }
    Ok(())
}

pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_default_matches_builtin_defaults() {
        let p = Profile::from_toml(default_profile_text()).unwrap();
        let mut expected = Profile::default();
        expected.meta.name = Some("default".into());
        assert_eq!(p, expected);
    }

    #[test]
    fn partial_profile_inherits_defaults() {
        let p = Profile::from_toml(
            r#"
            [gestures]
            pinch_threshold = 30.0

            [smoother]
            kind = "kalman"
            "#,
        )
        .unwrap();
        assert_eq!(p.gestures.pinch_threshold, 30.0);
        assert_eq!(p.gestures.pinch_debounce_ms, 200);
        assert_eq!(p.smoother.kind, SmootherKind::Kalman);
        assert_eq!(p.smoother.alpha_base, 0.3);
        assert_eq!(p.tracker.stability_frames, 5);
    }

    #[test]
    fn rejects_inverted_alpha_range() {
        let err = Profile::from_toml(
            r#"
            [smoother]
            alpha_min = 0.8
            alpha_max = 0.2
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("alpha"));
    }

    #[test]
    fn rejects_zero_stability_frames() {
        assert!(Profile::from_toml("[tracker]\nstability_frames = 0\n").is_err());
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let err = Profile::from_toml("[gestures]\nzoom_threshold = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("zoom_threshold"));
    }

    #[test]
    fn rejects_nan_knobs() {
        for txt in [
            "[smoother]\nadaptation_factor = nan\n",
            "[smoother]\nalpha_base = nan\n",
            "[tracker]\nmatch_radius = nan\n",
            "[velocity]\ngamma = nan\n",
            "[velocity]\ngain = nan\n",
            "[velocity]\nmin_velocity = nan\n",
            "[gestures]\npinch_threshold = nan\n",
        ] {
            assert!(Profile::from_toml(txt).is_err(), "accepted {txt:?}");
        }
    }

    #[test]
    fn rejects_unknown_identity() {
        assert!(Profile::from_toml("[tracker]\nidentity = \"appearance\"\n").is_err());
    }

    #[test]
    fn debounce_windows_are_milliseconds() {
        let g = GestureThresholds::default();
        assert_eq!(g.pinch_debounce(), Duration::from_millis(200));
        assert_eq!(g.swipe_debounce(), Duration::from_millis(500));
    }

    #[test]
    fn installs_default_and_switches_profiles() {
        let dir = std::env::temp_dir().join(format!("handctl-cfg-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let mut st = ConfigState::load_from(dir.clone()).unwrap();
        assert_eq!(st.active_name, "default");
        assert!(st.profiles_dir.join("default.toml").exists());

        fs::write(
            st.profiles_dir.join("desk.toml"),
            "[meta]\nname = \"desk\"\n[tracker]\nstability_frames = 3\n",
        )
        .unwrap();
        assert_eq!(st.list_profiles(), vec!["default", "desk"]);

        st.set_active("desk").unwrap();
        assert_eq!(st.profile.tracker.stability_frames, 3);
        assert_eq!(fs::read_to_string(&st.active_ptr).unwrap(), "desk");
        assert!(st.set_active("missing").is_err());

        // a broken edit keeps the last good profile
        fs::write(st.active_path(), "[tracker]\nstability_frames = 0\n").unwrap();
        assert!(st.reload().is_err());
        assert_eq!(st.profile.tracker.stability_frames, 3);

        // another process switching the pointer is picked up on reload
        fs::write(&st.active_ptr, "default").unwrap();
        st.reload().unwrap();
        assert_eq!(st.active_name, "default");
        assert_eq!(st.profile.tracker.stability_frames, 5);

        let _ = fs::remove_dir_all(&dir);
    }
}
