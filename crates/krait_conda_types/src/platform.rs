//! The platforms (subdirs) a channel can be sharded by.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A platform supported by the conda ecosystem. Every platform corresponds to
/// a subdirectory of a channel.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Platform {
    NoArch,
    Linux32,
    Linux64,
    LinuxAarch64,
    LinuxArmV7l,
    LinuxPpc64le,
    LinuxS390X,
    Osx64,
    OsxArm64,
    Win32,
    Win64,
    WinArm64,
}

impl Platform {
    /// Returns the platform the binary was compiled for.
    pub fn current() -> Platform {
        #[cfg(target_os = "linux")]
        {
            #[cfg(target_arch = "x86_64")]
            return Platform::Linux64;
            #[cfg(target_arch = "x86")]
            return Platform::Linux32;
            #[cfg(target_arch = "aarch64")]
            return Platform::LinuxAarch64;
            #[cfg(target_arch = "arm")]
            return Platform::LinuxArmV7l;
            #[cfg(all(target_arch = "powerpc64", target_endian = "little"))]
            return Platform::LinuxPpc64le;
            #[cfg(target_arch = "s390x")]
            return Platform::LinuxS390X;
            #[cfg(not(any(
                target_arch = "x86_64",
                target_arch = "x86",
                target_arch = "aarch64",
                target_arch = "arm",
                target_arch = "powerpc64",
                target_arch = "s390x"
            )))]
            compile_error!("unsupported linux architecture");
        }
        #[cfg(target_os = "macos")]
        {
            #[cfg(target_arch = "x86_64")]
            return Platform::Osx64;
            #[cfg(target_arch = "aarch64")]
            return Platform::OsxArm64;
        }
        #[cfg(target_os = "windows")]
        {
            #[cfg(target_arch = "x86_64")]
            return Platform::Win64;
            #[cfg(target_arch = "x86")]
            return Platform::Win32;
            #[cfg(target_arch = "aarch64")]
            return Platform::WinArm64;
        }
    }

    /// Returns a string representation, equal to the channel subdir name.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::NoArch => "noarch",
            Platform::Linux32 => "linux-32",
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::LinuxArmV7l => "linux-armv7l",
            Platform::LinuxPpc64le => "linux-ppc64le",
            Platform::LinuxS390X => "linux-s390x",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
            Platform::Win32 => "win-32",
            Platform::Win64 => "win-64",
            Platform::WinArm64 => "win-arm64",
        }
    }

    /// Returns true if the platform is windows based.
    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Win32 | Platform::Win64 | Platform::WinArm64)
    }

    /// Returns true if the platform is linux based.
    pub fn is_linux(self) -> bool {
        matches!(
            self,
            Platform::Linux32
                | Platform::Linux64
                | Platform::LinuxAarch64
                | Platform::LinuxArmV7l
                | Platform::LinuxPpc64le
                | Platform::LinuxS390X
        )
    }

    /// Returns true if the platform is macOS based.
    pub fn is_osx(self) -> bool {
        matches!(self, Platform::Osx64 | Platform::OsxArm64)
    }

    /// Returns true if this is the architecture independent platform.
    pub fn is_noarch(self) -> bool {
        self == Platform::NoArch
    }
}

/// An error that occurs when parsing an unknown platform string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("'{string}' is not a known platform")]
pub struct ParsePlatformError {
    /// The string that could not be parsed.
    pub string: String,
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "noarch" => Platform::NoArch,
            "linux-32" => Platform::Linux32,
            "linux-64" => Platform::Linux64,
            "linux-aarch64" => Platform::LinuxAarch64,
            "linux-armv7l" => Platform::LinuxArmV7l,
            "linux-ppc64le" => Platform::LinuxPpc64le,
            "linux-s390x" => Platform::LinuxS390X,
            "osx-64" => Platform::Osx64,
            "osx-arm64" => Platform::OsxArm64,
            "win-32" => Platform::Win32,
            "win-64" => Platform::Win64,
            "win-arm64" => Platform::WinArm64,
            string => {
                return Err(ParsePlatformError {
                    string: string.to_owned(),
                })
            }
        })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::Platform;

    #[test]
    fn roundtrip() {
        for platform in [
            Platform::NoArch,
            Platform::Linux64,
            Platform::OsxArm64,
            Platform::Win64,
        ] {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("amiga-68k".parse::<Platform>().is_err());
    }
}
