//! Indirect PHY register access through `PHY_CONTROL`.
//!
//! Control register layout:
//!
//! | bits   | field                              |
//! |--------|------------------------------------|
//! | 0..5   | opcode (`0x10` = read request)     |
//! | 4      | busy                               |
//! | 6..11  | PHY address                        |
//! | 11..16 | register number                    |
//! | 16..32 | data                               |
//!
//! A read is a write of the read opcode followed by reads of the control register until busy
//! clears; the result is then in the data half.

pub const PHY_COUNT: usize = 32;
pub const PHY_REG_COUNT: usize = 32;

const MDIO_BUSY: u32 = 0x10;
const MDIO_OPCODE_MASK: u32 = 0x1F;
const MDIO_OP_READ: u32 = 0x10;

const PHY_REG_CONTROL: usize = 0;
const PHY_REG_STATUS: usize = 1;
const PHY_REG_ID1: usize = 2;
const PHY_REG_ID2: usize = 3;
const PHY_REG_AN_ADVERTISE: usize = 4;
const PHY_REG_SPECIFIC_STATUS: usize = 17;

const BMCR_RESET: u16 = 0x8000;
const BMSR_LINK_STATUS: u16 = 0x0004;
const PSSR_LINK: u16 = 0x0400;
/// Forced on in PHY 1's advertisement register; the console kernel checks for it.
const AN_ADVERTISE_XENON_FIXUP: u16 = 0x0400;

const DEFAULT_BMCR: u16 = 0x1140;
const DEFAULT_BMSR: u16 = 0x796D;

/// Marvell 88E1111, auto-negotiation complete, 1000/full link up.
const PHY_DEFAULTS: &[(usize, u16)] = &[
    (PHY_REG_CONTROL, DEFAULT_BMCR),
    (PHY_REG_STATUS, DEFAULT_BMSR),
    (PHY_REG_ID1, 0x0141),
    (PHY_REG_ID2, 0x0CC2),
    (PHY_REG_AN_ADVERTISE, 0x01E1),
    (5, 0x45E1),
    (6, 0x000F),
    (9, 0x0300),
    (10, 0x7C00),
    (PHY_REG_SPECIFIC_STATUS, 0xAC00),
];

fn decode_address(control: u32) -> (usize, usize) {
    let phy = ((control >> 6) & 0x1F) as usize;
    let reg = ((control >> 11) & 0x1F) as usize;
    (phy, reg)
}

/// PHY register bank plus the MDIO control register.
#[derive(Debug, Clone)]
pub struct Mdio {
    bank: [[u16; PHY_REG_COUNT]; PHY_COUNT],
    control: u32,
    link_up: bool,
}

impl Default for Mdio {
    fn default() -> Self {
        Self::new()
    }
}

impl Mdio {
    pub fn new() -> Self {
        let mut bank = [[0u16; PHY_REG_COUNT]; PHY_COUNT];
        for regs in &mut bank {
            for &(reg, value) in PHY_DEFAULTS {
                regs[reg] = value;
            }
        }
        Self {
            bank,
            control: 0,
            link_up: true,
        }
    }

    pub fn register(&self, phy: usize, reg: usize) -> u16 {
        self.bank[phy % PHY_COUNT][reg % PHY_REG_COUNT]
    }

    pub fn control(&self) -> u32 {
        self.control
    }

    /// Guest read of `PHY_CONTROL`: completes the pending read transaction.
    pub fn read_control(&mut self) -> u32 {
        let (phy, reg) = decode_address(self.control);
        let value = self.bank[phy][reg];
        self.control = (u32::from(value) << 16) | (self.control & 0xFFFF & !MDIO_BUSY);
        tracing::trace!(phy, reg, value = format_args!("{value:#06x}"), "mdio read");
        self.control
    }

    /// Guest write of `PHY_CONTROL`.
    pub fn write_control(&mut self, value: u32) {
        if value & MDIO_OPCODE_MASK == MDIO_OP_READ {
            // Address phase of a read; the data half is filled in on the next control read.
            self.control = value;
            return;
        }

        let (phy, reg) = decode_address(value);
        let data = (value >> 16) as u16;
        tracing::trace!(phy, reg, data = format_args!("{data:#06x}"), "mdio write");

        match reg {
            PHY_REG_CONTROL if data & BMCR_RESET != 0 => {
                self.bank[phy][PHY_REG_CONTROL] = DEFAULT_BMCR;
                self.bank[phy][PHY_REG_STATUS] = DEFAULT_BMSR;
                self.apply_link(phy);
                tracing::debug!(phy, "phy reset");
            }
            PHY_REG_ID1 | PHY_REG_ID2 => {}
            PHY_REG_AN_ADVERTISE if phy == 1 => {
                self.bank[phy][reg] = data | AN_ADVERTISE_XENON_FIXUP;
            }
            _ => self.bank[phy][reg] = data,
        }

        self.control = value & !MDIO_BUSY;
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    /// Updates the link bits of every PHY. Returns whether the link state changed.
    pub fn set_link(&mut self, up: bool) -> bool {
        let changed = self.link_up != up;
        self.link_up = up;
        for phy in 0..PHY_COUNT {
            self.apply_link(phy);
        }
        changed
    }

    fn apply_link(&mut self, phy: usize) {
        let regs = &mut self.bank[phy];
        if self.link_up {
            regs[PHY_REG_STATUS] |= BMSR_LINK_STATUS;
            regs[PHY_REG_SPECIFIC_STATUS] |= PSSR_LINK;
        } else {
            regs[PHY_REG_STATUS] &= !BMSR_LINK_STATUS;
            regs[PHY_REG_SPECIFIC_STATUS] &= !PSSR_LINK;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(phy: u32, reg: u32) -> u32 {
        (phy << 6) | (reg << 11)
    }

    fn mdio_read(mdio: &mut Mdio, phy: u32, reg: u32) -> u16 {
        mdio.write_control(MDIO_OP_READ | addr(phy, reg));
        let control = mdio.read_control();
        assert_eq!(control & MDIO_BUSY, 0, "busy must clear after the read completes");
        (control >> 16) as u16
    }

    fn mdio_write(mdio: &mut Mdio, phy: u32, reg: u32, data: u16) {
        mdio.write_control(0x02 | addr(phy, reg) | (u32::from(data) << 16));
    }

    #[test]
    fn every_phy_reports_88e1111_with_link_up() {
        let mut mdio = Mdio::new();
        for phy in [0, 1, 31] {
            assert_eq!(mdio_read(&mut mdio, phy, 0), 0x1140);
            assert_eq!(mdio_read(&mut mdio, phy, 1), 0x796D);
            assert_eq!(mdio_read(&mut mdio, phy, 2), 0x0141);
            assert_eq!(mdio_read(&mut mdio, phy, 3), 0x0CC2);
            assert_eq!(mdio_read(&mut mdio, phy, 17), 0xAC00);
        }
    }

    #[test]
    fn repeated_polls_return_the_same_result() {
        let mut mdio = Mdio::new();
        mdio.write_control(MDIO_OP_READ | addr(0, 3));
        let first = mdio.read_control();
        let second = mdio.read_control();
        assert_eq!(first, second);
        assert_eq!(first >> 16, 0x0CC2);
    }

    #[test]
    fn identifier_registers_ignore_writes() {
        let mut mdio = Mdio::new();
        mdio_write(&mut mdio, 0, 2, 0xFFFF);
        mdio_write(&mut mdio, 0, 3, 0x0000);
        assert_eq!(mdio_read(&mut mdio, 0, 2), 0x0141);
        assert_eq!(mdio_read(&mut mdio, 0, 3), 0x0CC2);
    }

    #[test]
    fn writes_land_in_the_addressed_phy_only() {
        let mut mdio = Mdio::new();
        mdio_write(&mut mdio, 5, 9, 0x1234);
        assert_eq!(mdio.register(5, 9), 0x1234);
        assert_eq!(mdio.register(4, 9), 0x0300);
        assert_eq!(mdio.control() & MDIO_BUSY, 0);
        assert_eq!(mdio.control() >> 16, 0x1234);
    }

    #[test]
    fn control_reset_bit_restores_defaults_and_self_clears() {
        let mut mdio = Mdio::new();
        mdio_write(&mut mdio, 2, 0, 0x0000);
        mdio_write(&mut mdio, 2, 1, 0x0000);
        mdio_write(&mut mdio, 2, 0, 0x8000);
        assert_eq!(mdio_read(&mut mdio, 2, 0), 0x1140);
        assert_eq!(mdio_read(&mut mdio, 2, 1), 0x796D);
    }

    #[test]
    fn phy1_advertisement_forces_compat_bit() {
        let mut mdio = Mdio::new();
        mdio_write(&mut mdio, 1, 4, 0x0001);
        mdio_write(&mut mdio, 0, 4, 0x0001);
        assert_eq!(mdio.register(1, 4), 0x0401);
        assert_eq!(mdio.register(0, 4), 0x0001);
    }

    #[test]
    fn link_changes_toggle_status_bits_on_every_phy() {
        let mut mdio = Mdio::new();
        assert!(!mdio.set_link(true));
        assert!(mdio.set_link(false));
        for phy in 0..PHY_COUNT {
            assert_eq!(mdio.register(phy, 1) & BMSR_LINK_STATUS, 0);
            assert_eq!(mdio.register(phy, 17) & PSSR_LINK, 0);
        }

        // A PHY reset while the link is down must not resurrect the link bit.
        mdio_write(&mut mdio, 0, 0, 0x8000);
        assert_eq!(mdio.register(0, 1) & BMSR_LINK_STATUS, 0);

        assert!(mdio.set_link(true));
        assert_eq!(mdio.register(7, 1), 0x796D);
        assert_eq!(mdio.register(7, 17), 0xAC00);
    }
}
