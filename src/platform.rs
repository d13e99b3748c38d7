use std::fmt;
use std::sync::OnceLock;

/// The host platform in Go naming (`linux`/`amd64`), plus the spellings release
/// assets commonly use for the same OS and architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Operating system, e.g. `linux`, `darwin`, `windows`.
    pub os: String,
    /// Architecture, e.g. `amd64`, `arm64`.
    pub arch: String,
    /// Ordered spellings of `os` found in asset names.
    pub os_aliases: Vec<String>,
    /// Ordered spellings of `arch` found in asset names.
    pub arch_aliases: Vec<String>,
}

impl PlatformInfo {
    /// Builds the platform description for a Go-style OS/arch pair.
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            os_aliases: os_aliases(os).iter().map(|s| s.to_string()).collect(),
            arch_aliases: arch_aliases(arch).iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Returns true if `name` contains any OS alias (case-insensitive).
    ///
    /// Spellings of other systems that embed one of our aliases (`win` in
    /// `darwin`) are masked out first.
    pub fn matches_os(&self, name: &str) -> bool {
        let name = mask(name, os_conflicts(&self.os));
        self.os_aliases
            .iter()
            .any(|alias| name.contains(&alias.to_lowercase()))
    }

    /// Returns true if `name` contains any architecture alias (case-insensitive).
    pub fn matches_arch(&self, name: &str) -> bool {
        self.arch_rank(name).is_some()
    }

    /// Index of the first architecture alias found in `name`. Lower is more
    /// specific: `amd64` ranks before the bare `64`.
    ///
    /// Other architectures that embed one of our aliases (`arm64` for `arm`,
    /// `arm64` for the bare `64`) never match.
    pub fn arch_rank(&self, name: &str) -> Option<usize> {
        let name = mask(name, arch_conflicts(&self.arch));
        self.arch_aliases
            .iter()
            .position(|alias| name.contains(&alias.to_lowercase()))
    }

    /// Key used by the chain registry's `binaries` map, e.g. `linux/amd64`.
    pub fn registry_key(&self) -> String {
        format!("{}/{}", self.os, self.arch)
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Returns the platform this process runs on. Computed once.
pub fn current_platform() -> &'static PlatformInfo {
    static PLATFORM: OnceLock<PlatformInfo> = OnceLock::new();
    PLATFORM.get_or_init(|| {
        PlatformInfo::new(
            go_os(std::env::consts::OS),
            go_arch(std::env::consts::ARCH),
        )
    })
}

/// Maps Rust's `std::env::consts::OS` onto Go's `GOOS` naming.
pub fn go_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

/// Maps Rust's `std::env::consts::ARCH` onto Go's `GOARCH` naming.
pub fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

fn os_aliases(os: &str) -> Vec<&str> {
    match os {
        "linux" => vec!["linux", "Linux"],
        "darwin" => vec!["darwin", "Darwin", "macOS", "macos", "osx"],
        "windows" => vec!["windows", "Windows", "win64", "win"],
        "freebsd" => vec!["freebsd", "FreeBSD"],
        other => vec![other],
    }
}

fn arch_aliases(arch: &str) -> Vec<&str> {
    match arch {
        "amd64" => vec!["amd64", "x86_64", "x64", "64"],
        "arm64" => vec!["arm64", "aarch64", "armv8"],
        "386" => vec!["386", "i386", "i686", "x86", "32"],
        "arm" => vec!["arm", "armv7", "armv6"],
        other => vec![other],
    }
}

/// Lowercase spellings of other systems that contain one of `os`'s aliases.
fn os_conflicts(os: &str) -> &'static [&'static str] {
    match os {
        "windows" => &["darwin"],
        _ => &[],
    }
}

/// Lowercase spellings of other architectures that contain one of `arch`'s aliases.
fn arch_conflicts(arch: &str) -> &'static [&'static str] {
    match arch {
        "amd64" => &["arm64", "aarch64", "ppc64", "mips64", "riscv64", "loong64"],
        "arm" => &["arm64", "armv8"],
        _ => &[],
    }
}

/// Lowercases `name` and blanks out every conflicting spelling.
fn mask(name: &str, conflicts: &[&str]) -> String {
    conflicts
        .iter()
        .fold(name.to_lowercase(), |acc, c| acc.replace(c, " "))
}
