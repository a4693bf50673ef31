// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Microcontroller model.
//!
//! A `RawMcu` is the JSON shape produced by the package-description
//! importer; [`Mcu::from_raw`] validates it, decomposes every signal name
//! into peripheral instance / normalized type / function, synthesizes the
//! per-pin GPIO signals, and builds the lookup tables the solver leans on.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub mod pattern;

/// GPIO port number assigned to port letter 'A'. STM32 package files
/// number GPIO ports from 1, so `PA` pins live on `GPIO1`.
pub const GPIO_PORT_BASE: u32 = 1;

/// Peripheral-type aliases, applied when normalizing the type extracted
/// from an instance name. `TIMxG4`-style family-tagged timer instances
/// are handled structurally in [`split_instance`].
const TYPE_ALIASES: &[(&str, &str)] = &[("UART", "USART"), ("LPUART", "USART")];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinKind {
    Io,
    Power,
    Reset,
    Boot,
    MonoIo,
}

/// The wire format for a microcontroller description.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawMcu {
    pub reference: String,
    pub package: String,
    pub pins: Vec<RawPin>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawPin {
    pub position: String,
    pub name: String,
    pub kind: PinKind,
    #[serde(default)]
    pub signals: Vec<String>,
}

/// One alternate-function signal on a pin, decomposed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    /// Full name, e.g. `USART1_TX`.
    pub name: String,
    /// Peripheral instance, e.g. `USART1`.
    pub instance: String,
    /// Normalized peripheral type, e.g. `USART`.
    pub peripheral: String,
    pub instance_number: Option<u32>,
    /// Signal function, e.g. `TX`.
    pub function: String,
}

#[derive(Clone, Debug)]
pub struct Pin {
    pub position: String,
    pub name: String,
    pub kind: PinKind,
    pub signals: Vec<Signal>,
    /// Canonical GPIO name (`GPIO1_4` for `PA4`), present on GPIO pins.
    pub gpio_name: Option<String>,
}

impl Pin {
    pub fn is_assignable(&self) -> bool {
        matches!(self.kind, PinKind::Io | PinKind::MonoIo)
    }

    /// Port letter for `P<L><n>`-style pin names.
    pub fn gpio_letter(&self) -> Option<char> {
        let mut chars = self.name.chars();
        if chars.next() != Some('P') {
            return None;
        }
        match chars.next() {
            Some(l) if l.is_ascii_uppercase() => Some(l),
            _ => None,
        }
    }

    pub fn gpio_number(&self) -> Option<u32> {
        if self.gpio_letter().is_none() {
            return None;
        }
        self.name[2..].parse().ok()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PackageClass {
    /// Pins numbered around the package outline (LQFP, TSSOP, SOIC, ...).
    Linear,
    /// Pins on a letter-by-number grid (BGA, WLCSP).
    Grid,
}

#[derive(Copy, Clone, Debug)]
pub struct PackageGeometry {
    pub class: PackageClass,
    pub total_pins: u32,
}

#[derive(Clone, Debug)]
pub struct Mcu {
    pub reference: String,
    pub package: String,
    pub pins: Vec<Pin>,
    pub geometry: PackageGeometry,
    pin_by_name: HashMap<String, usize>,
    pin_by_position: HashMap<String, usize>,
    pin_by_gpio_name: HashMap<String, usize>,
    signal_pins: HashMap<String, Vec<usize>>,
    instance_pins: HashMap<String, Vec<usize>>,
    type_instances: HashMap<String, BTreeSet<String>>,
}

impl Mcu {
    pub fn from_json(bytes: &[u8]) -> Result<Mcu> {
        let raw: RawMcu =
            serde_json::from_slice(bytes).context("failed to decode MCU description")?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawMcu) -> Result<Mcu> {
        if raw.pins.is_empty() {
            bail!("MCU '{}' has no pins", raw.reference);
        }

        let geometry = geometry_of(&raw.package, raw.pins.len() as u32);
        let mut pins = Vec::with_capacity(raw.pins.len());
        for rp in raw.pins {
            let mut signals = Vec::new();
            for s in &rp.signals {
                signals.extend(decompose_signal(s));
            }
            let mut pin = Pin {
                position: rp.position,
                name: rp.name,
                kind: rp.kind,
                signals,
                gpio_name: None,
            };
            if pin.is_assignable() {
                if let (Some(letter), Some(num)) = (pin.gpio_letter(), pin.gpio_number()) {
                    let n = letter as u32 - 'A' as u32 + GPIO_PORT_BASE;
                    let gpio = format!("GPIO{}_{}", n, num);
                    pin.signals.push(Signal {
                        name: gpio.clone(),
                        instance: format!("GPIO{}", n),
                        peripheral: "GPIO".to_string(),
                        instance_number: Some(n),
                        function: num.to_string(),
                    });
                    pin.gpio_name = Some(gpio);
                }
            }
            pins.push(pin);
        }

        let mut pin_by_name = HashMap::new();
        let mut pin_by_position = HashMap::new();
        let mut pin_by_gpio_name = HashMap::new();
        let mut signal_pins: HashMap<String, Vec<usize>> = HashMap::new();
        let mut instance_pins: HashMap<String, Vec<usize>> = HashMap::new();
        let mut type_instances: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (i, pin) in pins.iter().enumerate() {
            if pin_by_name.insert(pin.name.clone(), i).is_some() {
                bail!("duplicate pin name '{}'", pin.name);
            }
            pin_by_position.insert(pin.position.clone(), i);
            if let Some(g) = &pin.gpio_name {
                pin_by_gpio_name.insert(g.clone(), i);
            }
            for sig in &pin.signals {
                signal_pins.entry(sig.name.clone()).or_default().push(i);
                let entry = instance_pins.entry(sig.instance.clone()).or_default();
                if entry.last() != Some(&i) {
                    entry.push(i);
                }
                type_instances
                    .entry(sig.peripheral.clone())
                    .or_default()
                    .insert(sig.instance.clone());
            }
        }

        Ok(Mcu {
            reference: raw.reference,
            package: raw.package,
            pins,
            geometry,
            pin_by_name,
            pin_by_position,
            pin_by_gpio_name,
            signal_pins,
            instance_pins,
            type_instances,
        })
    }

    pub fn pin_by_name(&self, name: &str) -> Option<&Pin> {
        self.pin_by_name.get(name).map(|&i| &self.pins[i])
    }

    pub fn pin_index(&self, name: &str) -> Option<usize> {
        self.pin_by_name.get(name).copied()
    }

    pub fn pin_by_position(&self, pos: &str) -> Option<&Pin> {
        self.pin_by_position.get(pos).map(|&i| &self.pins[i])
    }

    pub fn pin_by_gpio_name(&self, gpio: &str) -> Option<&Pin> {
        self.pin_by_gpio_name.get(gpio).map(|&i| &self.pins[i])
    }

    /// Pins carrying any signal of the given peripheral instance.
    pub fn instance_pins(&self, instance: &str) -> &[usize] {
        self.instance_pins
            .get(instance)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn signal_pins(&self, signal: &str) -> &[usize] {
        self.signal_pins
            .get(signal)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn instances_of_type(&self, ty: &str) -> Option<&BTreeSet<String>> {
        self.type_instances.get(ty)
    }

    /// Physical distance between two pins: circular hop count on linear
    /// packages, Euclidean grid distance on ball-grid packages.
    pub fn pin_distance(&self, a: usize, b: usize) -> f64 {
        let pa = &self.pins[a];
        let pb = &self.pins[b];
        match self.geometry.class {
            PackageClass::Linear => {
                let (Ok(na), Ok(nb)) =
                    (pa.position.parse::<i64>(), pb.position.parse::<i64>())
                else {
                    return 0.0;
                };
                let d = (na - nb).abs();
                let total = self.geometry.total_pins as i64;
                d.min((total - d).abs()) as f64
            }
            PackageClass::Grid => {
                let (Some((ra, ca)), Some((rb, cb))) =
                    (grid_position(&pa.position), grid_position(&pb.position))
                else {
                    return 0.0;
                };
                let dr = ra - rb;
                let dc = ca - cb;
                ((dr * dr + dc * dc) as f64).sqrt()
            }
        }
    }
}

/// `"A5"` → row 0, column 4.
fn grid_position(pos: &str) -> Option<(i64, i64)> {
    let mut chars = pos.chars();
    let row = chars.next()?;
    if !row.is_ascii_uppercase() {
        return None;
    }
    let col: i64 = chars.as_str().parse().ok()?;
    Some((row as i64 - 'A' as i64, col - 1))
}

fn geometry_of(package: &str, pin_count: u32) -> PackageGeometry {
    let digits: String = package.chars().filter(|c| c.is_ascii_digit()).collect();
    let total_pins = digits.parse().unwrap_or(pin_count);
    let up = package.to_uppercase();
    let class = if up.contains("BGA") || up.contains("CSP") {
        PackageClass::Grid
    } else {
        PackageClass::Linear
    };
    PackageGeometry { class, total_pins }
}

/// Splits an instance name into (normalized type, instance number). A
/// `G4` family tag between the type and nothing (`TIM20G4`) is dropped
/// before the trailing digits are read.
pub fn split_instance(instance: &str) -> (String, Option<u32>) {
    let mut base = instance;
    if let Some(stripped) = base.strip_suffix("G4") {
        if stripped.ends_with(|c: char| c.is_ascii_digit()) {
            base = stripped;
        }
    }
    let split = base
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let ty = &base[..split];
    let num = base[split..].parse().ok();
    (normalize_type(ty).to_string(), num)
}

pub fn normalize_type(ty: &str) -> &str {
    for (from, to) in TYPE_ALIASES {
        if ty == *from {
            return to;
        }
    }
    ty
}

/// Originals for a normalized type, for alias-aware pattern matching.
/// The identity entry is implicit; this returns only the extras.
pub fn reverse_aliases(normalized: &str) -> &'static [&'static str] {
    static TABLE: OnceLock<HashMap<&'static str, Vec<&'static str>>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut t: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for (from, to) in TYPE_ALIASES {
            t.entry(to).or_default().push(from);
        }
        t
    });
    table
        .get(normalized)
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

/// Decomposes a raw signal name. Hyphenated functions
/// (`SYS_JTCK-SWCLK`) expand to parallel signals on the same instance.
pub fn decompose_signal(raw: &str) -> Vec<Signal> {
    let (instance, function) = match raw.split_once('_') {
        Some((i, f)) => (i, f),
        None => (raw, ""),
    };
    let (peripheral, instance_number) = split_instance(instance);
    function
        .split('-')
        .map(|func| Signal {
            name: if func.is_empty() {
                raw.to_string()
            } else {
                format!("{}_{}", instance, func)
            },
            instance: instance.to_string(),
            peripheral: peripheral.clone(),
            instance_number,
            function: func.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(pos: &str, name: &str, signals: &[&str]) -> RawPin {
        RawPin {
            position: pos.to_string(),
            name: name.to_string(),
            kind: PinKind::Io,
            signals: signals.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn small_mcu() -> Mcu {
        Mcu::from_raw(RawMcu {
            reference: "STM32F103C8".to_string(),
            package: "LQFP48".to_string(),
            pins: vec![
                io("10", "PA0", &["TIM2_CH1", "ADC1_IN0"]),
                io("30", "PA9", &["USART1_TX"]),
                io("31", "PA10", &["USART1_RX"]),
                io("32", "PA14", &["SYS_JTCK-SWCLK"]),
                RawPin {
                    position: "1".to_string(),
                    name: "VBAT".to_string(),
                    kind: PinKind::Power,
                    signals: vec![],
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn signal_decomposition() {
        let sigs = decompose_signal("USART1_TX");
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].instance, "USART1");
        assert_eq!(sigs[0].peripheral, "USART");
        assert_eq!(sigs[0].instance_number, Some(1));
        assert_eq!(sigs[0].function, "TX");
    }

    #[test]
    fn uart_aliases_normalize() {
        assert_eq!(decompose_signal("UART4_TX")[0].peripheral, "USART");
        assert_eq!(decompose_signal("LPUART1_RX")[0].peripheral, "USART");
    }

    #[test]
    fn g4_family_tag_dropped() {
        let (ty, num) = split_instance("TIM20G4");
        assert_eq!(ty, "TIM");
        assert_eq!(num, Some(20));
        // A bare G4 suffix with no instance number stays what it is.
        assert_eq!(split_instance("USBG4").0, "USBG");
    }

    #[test]
    fn hyphenated_signals_split() {
        let sigs = decompose_signal("SYS_JTCK-SWCLK");
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].name, "SYS_JTCK");
        assert_eq!(sigs[1].name, "SYS_SWCLK");
        assert_eq!(sigs[0].instance, "SYS");
        assert_eq!(sigs[1].instance, "SYS");
    }

    #[test]
    fn gpio_signals_synthesized() {
        let mcu = small_mcu();
        let pa0 = mcu.pin_by_name("PA0").unwrap();
        assert_eq!(pa0.gpio_name.as_deref(), Some("GPIO1_0"));
        assert!(pa0.signals.iter().any(|s| s.name == "GPIO1_0"));
        // Power pins get no GPIO signal.
        let vbat = mcu.pin_by_name("VBAT").unwrap();
        assert!(vbat.signals.is_empty());
        assert!(vbat.gpio_name.is_none());
    }

    #[test]
    fn lookup_tables() {
        let mcu = small_mcu();
        assert_eq!(mcu.pin_by_position("30").unwrap().name, "PA9");
        assert_eq!(mcu.pin_by_gpio_name("GPIO1_0").unwrap().name, "PA0");
        assert_eq!(mcu.signal_pins("USART1_TX").len(), 1);
        assert_eq!(mcu.instance_pins("USART1").len(), 2);
        let usarts = mcu.instances_of_type("USART").unwrap();
        assert!(usarts.contains("USART1"));
    }

    #[test]
    fn linear_distance_wraps() {
        let mcu = small_mcu();
        let a = mcu.pin_index("PA0").unwrap(); // position 10
        let b = mcu.pin_index("PA14").unwrap(); // position 32
        // 22 forward vs 48 - 22 = 26 backward.
        assert_eq!(mcu.pin_distance(a, b), 22.0);
    }

    #[test]
    fn grid_distance_euclidean() {
        let mcu = Mcu::from_raw(RawMcu {
            reference: "STM32L4R9AI".to_string(),
            package: "UFBGA169".to_string(),
            pins: vec![io("A1", "PA0", &[]), io("D5", "PA1", &[])],
        })
        .unwrap();
        let a = mcu.pin_index("PA0").unwrap();
        let b = mcu.pin_index("PA1").unwrap();
        assert_eq!(mcu.pin_distance(a, b), 5.0); // 3-4-5 triangle
    }

    #[test]
    fn duplicate_pin_rejected() {
        let err = Mcu::from_raw(RawMcu {
            reference: "X".to_string(),
            package: "LQFP48".to_string(),
            pins: vec![io("1", "PA0", &[]), io("2", "PA0", &[])],
        })
        .unwrap_err();
        assert!(err.to_string().contains("duplicate pin"));
    }

    #[test]
    fn json_round() {
        let mcu = Mcu::from_json(
            br#"{
                "reference": "STM32G071GB",
                "package": "LQFP32",
                "pins": [
                    {"position": "7", "name": "PA2", "kind": "io",
                     "signals": ["USART2_TX"]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(mcu.reference, "STM32G071GB");
        assert_eq!(mcu.pins[0].signals[0].peripheral, "USART");
    }
}
