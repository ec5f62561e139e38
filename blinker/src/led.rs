use std::fmt;

use arrayvec::ArrayString;

pub const GPIOD_LED3: u8 = 13;
pub const GPIOD_LED4: u8 = 12;

/// One LED command as it travels through the notifier.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LedData {
    pub pin: u8,
    pub set: bool,
    pub label: ArrayString<16>,
    /// Asks every listener to leave its loop.
    pub stop: bool,
}

impl LedData {
    pub fn command(&mut self, pin: u8, set: bool, label: &str) {
        self.pin = pin;
        self.set = set;
        self.label.clear();
        self.label.push_str(label);
        self.stop = false;
    }

    pub fn stop(&mut self) {
        self.command(0, false, "stop");
        self.stop = true;
    }
}

/// The repeating blink pattern: orange on, green on, orange off, green off.
pub const PATTERN: [(u8, bool, &str); 4] = [
    (GPIOD_LED3, true, "orange on"),
    (GPIOD_LED4, true, "green on"),
    (GPIOD_LED3, false, "orange off"),
    (GPIOD_LED4, false, "green off"),
];

/// Simulated GPIO port D output register.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PinBank {
    odr: u16,
}

impl PinBank {
    pub fn apply(&mut self, data: &LedData) {
        let mask = 1u16 << (data.pin & 0x0f);
        if data.set {
            self.odr |= mask;
        } else {
            self.odr &= !mask;
        }
    }

    pub fn is_set(&self, pin: u8) -> bool {
        self.odr & (1 << (pin & 0x0f)) != 0
    }
}

impl fmt::Display for PinBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIOD={:016b}", self.odr)
    }
}

/// Line the serial echo prints for a command.
pub fn serial_line(data: &LedData) -> String {
    if data.set {
        format!("palSetPad(GPIOD, {});", data.pin)
    } else {
        format!("palClearPad(GPIOD, {});", data.pin)
    }
}
