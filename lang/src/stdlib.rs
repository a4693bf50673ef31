// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builtin macro library, shipped as constraint-language source and
//! parsed on demand. Local `macro` declarations shadow these by name.

use crate::ast::{MacroDecl, Stmt};
use crate::diag::Sink;

pub const SOURCE: &str = "\
# Builtin helpers for common peripheral wiring.

macro uart(tx, rx):
    tx = USART*_TX
    rx = USART*_RX
    require same_instance(tx, rx)

macro spi(mosi, miso, sck):
    mosi = SPI*_MOSI
    miso = SPI*_MISO
    sck = SPI*_SCK
    require same_instance(mosi, miso, sck)

macro spi_cs(mosi, miso, sck, cs):
    spi(mosi, miso, sck)
    cs = OUT

macro i2c(sda, scl):
    sda = I2C*_SDA
    scl = I2C*_SCL
    require same_instance(sda, scl)
";

pub fn builtin_macros() -> Vec<MacroDecl> {
    let mut sink = Sink::new();
    let prog = crate::parse(SOURCE, &mut sink);
    debug_assert!(
        !sink.has_errors(),
        "builtin macro library failed to parse: {:?}",
        sink.diags()
    );
    prog.stmts
        .into_iter()
        .filter_map(|s| match s {
            Stmt::MacroDef(m) => Some(m),
            _ => None,
        })
        .collect()
}
