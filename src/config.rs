//! Run configuration loaded from TOML. Every field has a default, so an empty file is valid.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Serialize, Deserialize};

use crate::devices::SessionSettings;
use crate::devices::oscilloscope::{AcquisitionConfig, Encoding};
use crate::devices::signal_generator::SignalSettings;
use crate::error::Result;

pub const DEFAULT_ADDRESS:&str = "TCPIP::169.254.16.237::INSTR";
pub const DEFAULT_INSTRUMENT_SCREENSHOT:&str = "c:\\temp\\Dev_Screenshot.png";
pub const DEFAULT_HOST_SCREENSHOT:&str = "PC_Screenshot.png";
pub const DEFAULT_TRACE_CSV:&str = "trace.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where the instrument writes its screenshot
    pub instrument_screenshot: String,
    pub host_screenshot: PathBuf,
    pub trace_csv: PathBuf,
    /// Encoding used for the trace that gets exported
    pub encoding: Encoding,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            instrument_screenshot: DEFAULT_INSTRUMENT_SCREENSHOT.to_owned(),
            host_screenshot: PathBuf::from(DEFAULT_HOST_SCREENSHOT),
            trace_csv: PathBuf::from(DEFAULT_TRACE_CSV),
            encoding: Encoding::Real32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub address: String,
    /// Resource string of the signal generator; the oscilloscope address when absent
    pub generator_address: Option<String>,
    pub session: SessionSettings,
    pub acquisition: AcquisitionConfig,
    pub signal: SignalSettings,
    pub output: OutputConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            generator_address: None,
            session: SessionSettings::default(),
            acquisition: AcquisitionConfig::default(),
            signal: SignalSettings::default(),
            output: OutputConfig::default(),
        }
    }
}

impl RunConfig {

    pub fn from_toml(text:&str) -> Result<Self> {
        let cfg:RunConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path:P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.acquisition.validate()
    }

    pub fn generator_address(&self) -> &str {
        self.generator_address.as_deref().unwrap_or(&self.address)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::oscilloscope::Coupling;
    use crate::error::Error;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = RunConfig::from_toml("").unwrap();
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.address, "TCPIP::169.254.16.237::INSTR");
        assert_eq!(cfg.session.opc_timeout_ms, 15000);
        assert_eq!(cfg.output.host_screenshot, PathBuf::from("PC_Screenshot.png"));
        assert_eq!(cfg.generator_address(), cfg.address);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = RunConfig::from_toml(r#"
            address = "SIM"

            [session]
            opc_timeout_ms = 500

            [acquisition]
            coupling = "dc"
            trigger_level_v = 0.1

            [output]
            encoding = "ascii"
        "#).unwrap();

        assert_eq!(cfg.address, "SIM");
        assert_eq!(cfg.session.opc_timeout_ms, 500);
        assert_eq!(cfg.session.response_timeout_ms, 3000);
        assert_eq!(cfg.acquisition.coupling, Coupling::Dc);
        assert_eq!(cfg.acquisition.range_v, 2.0);
        assert_eq!(cfg.output.encoding, Encoding::Ascii);
    }

    #[test]
    fn bad_toml_and_bad_values_are_rejected() {
        assert!(matches!(RunConfig::from_toml("address = ["), Err(Error::ConfigParse(_))));
        assert!(matches!(RunConfig::from_toml("[acquisition]\nchannel = 9"), Err(Error::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scopectl.toml");
        fs::write(&path, "[signal]\nfrequency_mhz = 5.0\nwaveform = \"square\"\n").unwrap();

        let cfg = RunConfig::load(&path).unwrap();
        assert_eq!(cfg.signal.frequency_mhz, 5.0);
        assert!(matches!(RunConfig::load(dir.path().join("nope.toml")), Err(Error::Io(_))));
    }
}
