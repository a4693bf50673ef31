// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signal-pattern matching.
//!
//! Resolves a parsed pattern (`USART*_TX`, `TIM[1-3]_CH[1,2]`, ...)
//! against the concrete per-pin signal lists of an [`Mcu`]. Each pattern
//! side matches independently; the instance side additionally sees the
//! normalized peripheral type and its aliases, so `USART*` finds
//! `UART4_TX` and `LPUART1_TX` as well.

use std::collections::HashSet;

use pinplan_lang::ast::{PatternPart, SignalPattern};

use crate::{reverse_aliases, Mcu, Pin, Signal};

/// One `(pin, signal)` candidate produced by a pattern.
#[derive(Copy, Clone, Debug)]
pub struct Match<'a> {
    pub pin_index: usize,
    pub pin: &'a Pin,
    pub signal_index: usize,
    pub signal: &'a Signal,
}

/// Enumerates all matches of `pattern` on assignable pins. When
/// `allowed_pins` is given (from `channel NAME @ ...`), a pin qualifies
/// if the set contains either its raw name or its canonical GPIO name.
pub fn find_matches<'a>(
    mcu: &'a Mcu,
    pattern: &SignalPattern,
    allowed_pins: Option<&HashSet<String>>,
) -> Vec<Match<'a>> {
    let mut out = Vec::new();
    for (pin_index, pin) in mcu.pins.iter().enumerate() {
        if !pin.is_assignable() {
            continue;
        }
        if let Some(allowed) = allowed_pins {
            let by_gpio = pin
                .gpio_name
                .as_ref()
                .is_some_and(|g| allowed.contains(g));
            if !allowed.contains(&pin.name) && !by_gpio {
                continue;
            }
        }
        for (signal_index, signal) in pin.signals.iter().enumerate() {
            if instance_side_matches(&pattern.instance, signal)
                && side_matches(&pattern.function, &signal.function)
            {
                out.push(Match {
                    pin_index,
                    pin,
                    signal_index,
                    signal,
                });
            }
        }
    }
    out
}

fn instance_side_matches(part: &PatternPart, signal: &Signal) -> bool {
    match part {
        PatternPart::Literal(lit) => signal.instance == *lit,
        PatternPart::Any => true,
        PatternPart::Wildcard(prefix) => {
            signal.instance.starts_with(prefix.as_str())
                || signal.peripheral.starts_with(prefix.as_str())
                || reverse_aliases(prefix)
                    .iter()
                    .any(|alias| signal.instance.starts_with(alias))
        }
        PatternPart::Range { prefix, values } => values.iter().any(|v| {
            signal.instance == format!("{}{}", prefix, v)
                || reverse_aliases(prefix)
                    .iter()
                    .any(|alias| signal.instance == format!("{}{}", alias, v))
        }),
    }
}

/// Function-side matching: no type aliasing, and ranges are exact —
/// `CH[1,2]` matches `CH1` but not `CH1N`.
fn side_matches(part: &PatternPart, value: &str) -> bool {
    match part {
        PatternPart::Literal(lit) => value == lit,
        PatternPart::Any => true,
        PatternPart::Wildcard(prefix) => value.starts_with(prefix.as_str()),
        PatternPart::Range { prefix, values } => values
            .iter()
            .any(|v| value == format!("{}{}", prefix, v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PinKind, RawMcu, RawPin};
    use pinplan_lang::diag::Loc;

    fn io(pos: &str, name: &str, signals: &[&str]) -> RawPin {
        RawPin {
            position: pos.to_string(),
            name: name.to_string(),
            kind: PinKind::Io,
            signals: signals.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn mcu() -> Mcu {
        Mcu::from_raw(RawMcu {
            reference: "STM32G474RE".to_string(),
            package: "LQFP64".to_string(),
            pins: vec![
                io("14", "PA0", &["TIM2_CH1", "ADC1_IN0"]),
                io("15", "PA1", &["TIM2_CH2", "TIM5_CH2"]),
                io("42", "PA9", &["USART1_TX", "TIM1_CH2"]),
                io("43", "PA10", &["USART1_RX", "TIM1_CH3"]),
                io("16", "PA2", &["USART2_TX", "LPUART1_TX"]),
                io("29", "PB10", &["UART4_TX", "TIM2_CH3"]),
                io("55", "PB3", &["TIM2_CH2", "SPI1_SCK", "SYS_JTDO-TRACESWO"]),
                io("21", "PB0", &["TIM1_CH2N", "TIM8_CH2N"]),
                RawPin {
                    position: "13".to_string(),
                    name: "VDDA".to_string(),
                    kind: PinKind::Power,
                    signals: vec!["ADC_VREF".to_string()],
                },
            ],
        })
        .unwrap()
    }

    fn pat(instance: PatternPart, function: PatternPart) -> SignalPattern {
        SignalPattern {
            instance,
            function,
            text: String::new(),
            loc: Loc { line: 1, col: 1 },
        }
    }

    fn names(matches: &[Match<'_>]) -> Vec<(String, String)> {
        matches
            .iter()
            .map(|m| (m.pin.name.clone(), m.signal.name.clone()))
            .collect()
    }

    #[test]
    fn literal_matches_one_instance() {
        let mcu = mcu();
        let m = find_matches(
            &mcu,
            &pat(
                PatternPart::Literal("USART1".to_string()),
                PatternPart::Literal("TX".to_string()),
            ),
            None,
        );
        assert_eq!(names(&m), vec![("PA9".to_string(), "USART1_TX".to_string())]);
    }

    #[test]
    fn wildcard_covers_uart_aliases() {
        let mcu = mcu();
        let m = find_matches(
            &mcu,
            &pat(
                PatternPart::Wildcard("USART".to_string()),
                PatternPart::Literal("TX".to_string()),
            ),
            None,
        );
        let got = names(&m);
        // USART1, USART2, and the aliases LPUART1 and UART4 all count.
        assert!(got.contains(&("PA9".to_string(), "USART1_TX".to_string())));
        assert!(got.contains(&("PA2".to_string(), "USART2_TX".to_string())));
        assert!(got.contains(&("PA2".to_string(), "LPUART1_TX".to_string())));
        assert!(got.contains(&("PB10".to_string(), "UART4_TX".to_string())));
    }

    #[test]
    fn range_is_exact_on_function_side() {
        let mcu = mcu();
        let m = find_matches(
            &mcu,
            &pat(
                PatternPart::Wildcard("TIM".to_string()),
                PatternPart::Range {
                    prefix: "CH".to_string(),
                    values: vec![1, 2],
                },
            ),
            None,
        );
        let got = names(&m);
        // CH1/CH2 only; CH2N and CH3 must not slip through.
        assert!(got.contains(&("PA0".to_string(), "TIM2_CH1".to_string())));
        assert!(got.contains(&("PA9".to_string(), "TIM1_CH2".to_string())));
        assert!(!got.iter().any(|(_, s)| s.ends_with("CH2N")));
        assert!(!got.iter().any(|(_, s)| s.ends_with("CH3")));
    }

    #[test]
    fn range_on_instance_side() {
        let mcu = mcu();
        let m = find_matches(
            &mcu,
            &pat(
                PatternPart::Range {
                    prefix: "TIM".to_string(),
                    values: vec![1, 5],
                },
                PatternPart::Any,
            ),
            None,
        );
        let got = names(&m);
        assert!(got.iter().all(|(_, s)| s.starts_with("TIM1_") || s.starts_with("TIM5_")));
        assert!(!got.is_empty());
    }

    #[test]
    fn unassignable_pins_excluded() {
        let mcu = mcu();
        let m = find_matches(
            &mcu,
            &pat(PatternPart::Wildcard("ADC".to_string()), PatternPart::Any),
            None,
        );
        assert!(names(&m).iter().all(|(p, _)| p != "VDDA"));
    }

    #[test]
    fn allowed_pins_by_raw_and_gpio_name() {
        let mcu = mcu();
        let pattern = pat(PatternPart::Wildcard("TIM".to_string()), PatternPart::Any);

        let allowed: HashSet<String> = ["PA1".to_string()].into_iter().collect();
        let m = find_matches(&mcu, &pattern, Some(&allowed));
        assert!(names(&m).iter().all(|(p, _)| p == "PA1"));
        assert!(!m.is_empty());

        // PA1 is GPIO1_1 by canonical name.
        let allowed: HashSet<String> = ["GPIO1_1".to_string()].into_iter().collect();
        let m = find_matches(&mcu, &pattern, Some(&allowed));
        assert!(names(&m).iter().all(|(p, _)| p == "PA1"));
        assert!(!m.is_empty());
    }

    #[test]
    fn gpio_any_matches_synthesized_signals() {
        let mcu = mcu();
        let m = find_matches(
            &mcu,
            &pat(PatternPart::Wildcard("GPIO".to_string()), PatternPart::Any),
            None,
        );
        // One synthetic GPIO signal per assignable pin.
        assert_eq!(m.len(), 8);
    }

    #[test]
    fn hyphen_split_signals_match_separately() {
        let mcu = mcu();
        let m = find_matches(
            &mcu,
            &pat(
                PatternPart::Literal("SYS".to_string()),
                PatternPart::Literal("TRACESWO".to_string()),
            ),
            None,
        );
        assert_eq!(
            names(&m),
            vec![("PB3".to_string(), "SYS_TRACESWO".to_string())]
        );
    }
}
