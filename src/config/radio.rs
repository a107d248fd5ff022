//! Node and radio settings.
//!
//! [`MeshcoreSettings`] is the flat record the user edits (node identity,
//! location sharing, LoRa parameters, SPI/GPIO pin map). It is persisted in the
//! store's settings tree. [`RuntimeRadioConfig`] is what a radio session is
//! built from, derived either from settings or from `MESHCORE_*` environment
//! variables.

use serde::{Deserialize, Serialize};

pub const PRESET_CUSTOM: &str = "custom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshcoreSettings {
    pub node_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Include the GPS position in outgoing adverts.
    pub share_position: bool,
    /// Answer telemetry requests from other nodes.
    pub allow_telemetry: bool,

    pub radio_preset: String,
    pub frequency: u32,
    pub bandwidth: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub tx_power: i8,
    pub preamble_length: u16,

    pub bus_id: i32,
    pub cs_id: i32,
    pub cs_pin: i32,
    pub reset_pin: i32,
    pub busy_pin: i32,
    pub irq_pin: i32,
    pub txen_pin: i32,
    pub rxen_pin: i32,
    pub is_waveshare: bool,
    pub use_dio2_rf: bool,
    pub use_dio3_tcxo: bool,
}

impl Default for MeshcoreSettings {
    fn default() -> Self {
        Self {
            node_name: "uconsole-node".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            share_position: false,
            allow_telemetry: true,
            radio_preset: "meshcore-us".to_string(),
            frequency: 910_525_000,
            bandwidth: 62_500,
            spreading_factor: 7,
            coding_rate: 5,
            tx_power: 22,
            preamble_length: 17,
            bus_id: 1,
            cs_id: 0,
            cs_pin: -1,
            reset_pin: 25,
            busy_pin: 24,
            irq_pin: 26,
            txen_pin: -1,
            rxen_pin: -1,
            is_waveshare: false,
            use_dio2_rf: true,
            use_dio3_tcxo: true,
        }
    }
}

/// LoRa parameters a named preset overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioPreset {
    pub name: &'static str,
    pub frequency: u32,
    pub bandwidth: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub preamble_length: u16,
    pub tx_power: i8,
}

pub const RADIO_PRESETS: [RadioPreset; 2] = [
    RadioPreset {
        name: "meshcore-us",
        frequency: 910_525_000,
        bandwidth: 62_500,
        spreading_factor: 7,
        coding_rate: 5,
        preamble_length: 17,
        tx_power: 22,
    },
    RadioPreset {
        name: "meshcore-eu",
        frequency: 869_525_000,
        bandwidth: 250_000,
        spreading_factor: 11,
        coding_rate: 5,
        preamble_length: 17,
        tx_power: 22,
    },
];

pub fn find_preset(name: &str) -> Option<&'static RadioPreset> {
    RADIO_PRESETS.iter().find(|p| p.name == name)
}

/// Apply a named preset. The preset name is always recorded; radio fields
/// change only when the name is a known preset.
pub fn apply_preset(settings: &MeshcoreSettings, preset: &str) -> MeshcoreSettings {
    let mut updated = settings.clone();
    updated.radio_preset = preset.to_string();
    if let Some(p) = find_preset(preset) {
        updated.frequency = p.frequency;
        updated.bandwidth = p.bandwidth;
        updated.spreading_factor = p.spreading_factor;
        updated.coding_rate = p.coding_rate;
        updated.preamble_length = p.preamble_length;
        updated.tx_power = p.tx_power;
    }
    updated
}

/// SPI/GPIO wiring and LoRa modem parameters handed to the radio driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareRadioConfig {
    pub bus_id: i32,
    pub cs_id: i32,
    pub cs_pin: i32,
    pub reset_pin: i32,
    pub busy_pin: i32,
    pub irq_pin: i32,
    pub txen_pin: i32,
    pub rxen_pin: i32,
    pub frequency: u32,
    pub tx_power: i8,
    pub spreading_factor: u8,
    pub bandwidth: u32,
    pub coding_rate: u8,
    pub preamble_length: u16,
    pub is_waveshare: bool,
    pub use_dio2_rf: bool,
    pub use_dio3_tcxo: bool,
}

impl Default for HardwareRadioConfig {
    fn default() -> Self {
        Self::from(&MeshcoreSettings::default())
    }
}

impl From<&MeshcoreSettings> for HardwareRadioConfig {
    fn from(s: &MeshcoreSettings) -> Self {
        Self {
            bus_id: s.bus_id,
            cs_id: s.cs_id,
            cs_pin: s.cs_pin,
            reset_pin: s.reset_pin,
            busy_pin: s.busy_pin,
            irq_pin: s.irq_pin,
            txen_pin: s.txen_pin,
            rxen_pin: s.rxen_pin,
            frequency: s.frequency,
            tx_power: s.tx_power,
            spreading_factor: s.spreading_factor,
            bandwidth: s.bandwidth,
            coding_rate: s.coding_rate,
            preamble_length: s.preamble_length,
            is_waveshare: s.is_waveshare,
            use_dio2_rf: s.use_dio2_rf,
            use_dio3_tcxo: s.use_dio3_tcxo,
        }
    }
}

impl HardwareRadioConfig {
    /// Pin map on one line, for startup logs.
    pub fn to_log_string(&self) -> String {
        format!(
            "bus_id={} cs_id={} cs_pin={} reset_pin={} busy_pin={} irq_pin={} \
             txen_pin={} rxen_pin={} is_waveshare={} use_dio2_rf={} use_dio3_tcxo={}",
            self.bus_id,
            self.cs_id,
            self.cs_pin,
            self.reset_pin,
            self.busy_pin,
            self.irq_pin,
            self.txen_pin,
            self.rxen_pin,
            self.is_waveshare,
            self.use_dio2_rf,
            self.use_dio3_tcxo
        )
    }

    /// Defaults overridden by `MESHCORE_*` variables read through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let env = EnvReader { lookup };
        Self {
            bus_id: env.num("MESHCORE_BUS_ID", d.bus_id),
            cs_id: env.num("MESHCORE_CS_ID", d.cs_id),
            cs_pin: env.num("MESHCORE_CS_PIN", d.cs_pin),
            reset_pin: env.num("MESHCORE_RESET_PIN", d.reset_pin),
            busy_pin: env.num("MESHCORE_BUSY_PIN", d.busy_pin),
            irq_pin: env.num("MESHCORE_IRQ_PIN", d.irq_pin),
            txen_pin: env.num("MESHCORE_TXEN_PIN", d.txen_pin),
            rxen_pin: env.num("MESHCORE_RXEN_PIN", d.rxen_pin),
            frequency: env.num("MESHCORE_FREQUENCY", d.frequency),
            tx_power: env.num("MESHCORE_TX_POWER", d.tx_power),
            spreading_factor: env.num("MESHCORE_SPREADING_FACTOR", d.spreading_factor),
            bandwidth: env.num("MESHCORE_BANDWIDTH", d.bandwidth),
            coding_rate: env.num("MESHCORE_CODING_RATE", d.coding_rate),
            preamble_length: env.num("MESHCORE_PREAMBLE_LENGTH", d.preamble_length),
            is_waveshare: env.flag("MESHCORE_IS_WAVESHARE", d.is_waveshare),
            use_dio2_rf: env.flag("MESHCORE_USE_DIO2_RF", d.use_dio2_rf),
            use_dio3_tcxo: env.flag("MESHCORE_USE_DIO3_TCXO", d.use_dio3_tcxo),
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_with(|k| std::env::var(k).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRadioConfig {
    pub node_name: String,
    pub share_public_key: bool,
    pub mesh_mode: bool,
    pub encryption_enabled: bool,
    pub hardware: HardwareRadioConfig,
}

impl RuntimeRadioConfig {
    /// Session config for `node_name` with flags and hardware taken from the environment.
    pub fn from_env(node_name: &str) -> Self {
        Self::from_env_with(node_name, |k| std::env::var(k).ok())
    }

    pub fn from_env_with<F>(node_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup: &lookup };
        Self {
            node_name: node_name.to_string(),
            share_public_key: env.flag("MESHCORE_SHARE_PUBLIC_KEY", true),
            mesh_mode: env.flag("MESHCORE_MESH_MODE", true),
            encryption_enabled: env.flag("MESHCORE_ENABLE_ENCRYPTION", true),
            hardware: HardwareRadioConfig::from_env_with(&lookup),
        }
    }
}

/// Session config derived from user settings. The protocol flags are fixed on.
pub fn runtime_config_from_settings(settings: &MeshcoreSettings) -> RuntimeRadioConfig {
    RuntimeRadioConfig {
        node_name: settings.node_name.clone(),
        share_public_key: true,
        mesh_mode: true,
        encryption_enabled: true,
        hardware: HardwareRadioConfig::from(settings),
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn num<T: std::str::FromStr>(&self, name: &str, default: T) -> T {
        (self.lookup)(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        match (self.lookup)(name) {
            Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn eu_preset_overwrites_radio_fields() {
        let base = MeshcoreSettings::default();
        let eu = apply_preset(&base, "meshcore-eu");
        assert_eq!(eu.radio_preset, "meshcore-eu");
        assert_eq!(eu.frequency, 869_525_000);
        assert_eq!(eu.bandwidth, 250_000);
        assert_eq!(eu.spreading_factor, 11);
        assert_eq!(eu.node_name, base.node_name);
        // input untouched
        assert_eq!(base.frequency, 910_525_000);
    }

    #[test]
    fn unknown_preset_only_records_name() {
        let mut base = MeshcoreSettings::default();
        base.frequency = 915_000_000;
        let out = apply_preset(&base, "custom");
        assert_eq!(out.radio_preset, "custom");
        assert_eq!(out.frequency, 915_000_000);
    }

    #[test]
    fn env_overrides_with_fallbacks() {
        let vars: HashMap<&str, &str> = [
            ("MESHCORE_IRQ_PIN", "16"),
            ("MESHCORE_FREQUENCY", "not-a-number"),
            ("MESHCORE_IS_WAVESHARE", "Yes"),
            ("MESHCORE_USE_DIO3_TCXO", "0"),
            ("MESHCORE_MESH_MODE", "off"),
        ]
        .into_iter()
        .collect();
        let cfg = RuntimeRadioConfig::from_env_with("node", |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.hardware.irq_pin, 16);
        assert_eq!(cfg.hardware.frequency, 910_525_000);
        assert!(cfg.hardware.is_waveshare);
        assert!(!cfg.hardware.use_dio3_tcxo);
        assert!(!cfg.mesh_mode);
        assert!(cfg.share_public_key);
    }

    #[test]
    fn log_string_lists_pins() {
        let line = HardwareRadioConfig::default().to_log_string();
        assert!(line.starts_with("bus_id=1 cs_id=0 cs_pin=-1 reset_pin=25"));
        assert!(line.ends_with("use_dio3_tcxo=true"));
    }

    #[test]
    fn settings_derive_runtime_config() {
        let mut s = MeshcoreSettings::default();
        s.node_name = "base-camp".into();
        s.reset_pin = 18;
        let rt = runtime_config_from_settings(&s);
        assert_eq!(rt.node_name, "base-camp");
        assert_eq!(rt.hardware.reset_pin, 18);
        assert!(rt.encryption_enabled);
    }
}
