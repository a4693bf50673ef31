// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pin and peripheral-instance bookkeeping for an in-progress search.
//!
//! The tracker enforces, across paired `assign`/`unassign` calls:
//! - a pin belongs to at most one port (reserved pins to a sentinel);
//! - within a port, a pin stays on the channel that first claimed it,
//!   even as other configs of the port reuse it;
//! - a pin appears at most once per `(port, config)`;
//! - a non-shared peripheral instance belongs to at most one port.
//!
//! Refcounts make restoration exact: a `(port, pin)` binding drops only
//! when the last config referencing it backtracks.

use std::collections::{HashMap, HashSet};

use crate::context::RESERVED_PORT;

#[derive(Clone, Debug)]
pub struct PinTracker {
    pin_owner: Vec<Option<usize>>,
    port_pin_channel: HashMap<(usize, usize), usize>,
    port_pin_refcount: HashMap<(usize, usize), u32>,
    config_pins: HashMap<(usize, usize), HashSet<usize>>,
    instance_owner: Vec<Option<usize>>,
    instance_refcount: HashMap<(usize, usize), u32>,
    shared: Vec<bool>,
}

impl PinTracker {
    pub fn new(num_pins: usize, instance_shared: &[bool], reserved: &[usize]) -> Self {
        let mut pin_owner = vec![None; num_pins];
        for &pin in reserved {
            pin_owner[pin] = Some(RESERVED_PORT);
        }
        PinTracker {
            pin_owner,
            port_pin_channel: HashMap::new(),
            port_pin_refcount: HashMap::new(),
            config_pins: HashMap::new(),
            instance_owner: vec![None; instance_shared.len()],
            instance_refcount: HashMap::new(),
            shared: instance_shared.to_vec(),
        }
    }

    pub fn can_assign(
        &self,
        pin: usize,
        port: usize,
        config: usize,
        channel: usize,
        instance: usize,
    ) -> bool {
        match self.pin_owner[pin] {
            Some(owner) if owner != port => return false,
            _ => {}
        }
        if self
            .config_pins
            .get(&(port, config))
            .is_some_and(|pins| pins.contains(&pin))
        {
            return false;
        }
        if let Some(&ch) = self.port_pin_channel.get(&(port, pin)) {
            if ch != channel {
                return false;
            }
        }
        if !self.shared[instance] {
            match self.instance_owner[instance] {
                Some(owner) if owner != port => return false,
                _ => {}
            }
        }
        true
    }

    pub fn assign(&mut self, pin: usize, port: usize, config: usize, channel: usize, instance: usize) {
        debug_assert!(self.can_assign(pin, port, config, channel, instance));
        self.pin_owner[pin] = Some(port);
        *self.port_pin_refcount.entry((port, pin)).or_insert(0) += 1;
        self.port_pin_channel.entry((port, pin)).or_insert(channel);
        self.config_pins
            .entry((port, config))
            .or_default()
            .insert(pin);
        if !self.shared[instance] {
            self.instance_owner[instance] = Some(port);
            *self.instance_refcount.entry((port, instance)).or_insert(0) += 1;
        }
    }

    pub fn unassign(
        &mut self,
        pin: usize,
        port: usize,
        config: usize,
        channel: usize,
        instance: usize,
    ) {
        let _ = channel;
        self.config_pins
            .get_mut(&(port, config))
            .expect("unassign without assign")
            .remove(&pin);
        let rc = self
            .port_pin_refcount
            .get_mut(&(port, pin))
            .expect("unassign without assign");
        *rc -= 1;
        if *rc == 0 {
            self.port_pin_refcount.remove(&(port, pin));
            self.port_pin_channel.remove(&(port, pin));
            self.pin_owner[pin] = None;
        }
        if !self.shared[instance] {
            let rc = self
                .instance_refcount
                .get_mut(&(port, instance))
                .expect("unassign without assign");
            *rc -= 1;
            if *rc == 0 {
                self.instance_refcount.remove(&(port, instance));
                self.instance_owner[instance] = None;
            }
        }
    }
}
