//! Factory trimming coefficients and the fixed-point compensation formulas.
//!
//! The arithmetic follows the reference code in the BMP280 datasheet
//! (section 8.2): 32-bit temperature, 64-bit pressure. Intermediate values
//! wrap at those widths exactly as the reference does.

use core::num::Wrapping;

use serde::{Deserialize, Serialize};

use super::registers::CALIBRATION_LEN;

/// Coefficients `dig_T1..dig_T3` and `dig_P1..dig_P9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
}

impl Calibration {
    /// Decode the block read from `0x88`. All words are little-endian; the
    /// last two bytes are reserved.
    pub fn from_bytes(bytes: &[u8; CALIBRATION_LEN]) -> Self {
        let unsigned = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let signed = |i: usize| i16::from_le_bytes([bytes[i], bytes[i + 1]]);

        Self {
            t1: unsigned(0),
            t2: signed(2),
            t3: signed(4),
            p1: unsigned(6),
            p2: signed(8),
            p3: signed(10),
            p4: signed(12),
            p5: signed(14),
            p6: signed(16),
            p7: signed(18),
            p8: signed(20),
            p9: signed(22),
        }
    }

    /// Returns the temperature in hundredths of °C and `t_fine`, the
    /// intermediate the pressure formula depends on.
    pub fn compensate_temperature(&self, adc_t: i32) -> (i32, i32) {
        let adc = Wrapping(adc_t);
        let t1 = Wrapping(i32::from(self.t1));
        let t2 = Wrapping(i32::from(self.t2));
        let t3 = Wrapping(i32::from(self.t3));

        let var1 = (((adc >> 3) - (t1 << 1)) * t2) >> 11;
        let delta = (adc >> 4) - t1;
        let var2 = (((delta * delta) >> 12) * t3) >> 14;

        let t_fine = var1 + var2;
        let temperature = (t_fine * Wrapping(5) + Wrapping(128)) >> 8;
        (temperature.0, t_fine.0)
    }

    /// Returns the pressure in Pa as unsigned Q24.8.
    ///
    /// An all-zero `dig_P1` makes the divisor zero; the result is then 0,
    /// which callers cannot tell apart from a real reading.
    pub fn compensate_pressure(&self, adc_p: i32, t_fine: i32) -> u32 {
        let p = |c: i16| Wrapping(i64::from(c));

        let mut var1 = Wrapping(i64::from(t_fine)) - Wrapping(128_000);
        let mut var2 = var1 * var1 * p(self.p6);
        var2 += (var1 * p(self.p5)) << 17;
        var2 += p(self.p4) << 35;
        var1 = ((var1 * var1 * p(self.p3)) >> 8) + ((var1 * p(self.p2)) << 12);
        var1 = ((Wrapping(1i64 << 47) + var1) * Wrapping(i64::from(self.p1))) >> 33;

        if var1.0 == 0 {
            return 0;
        }

        let mut pressure = Wrapping(1_048_576) - Wrapping(i64::from(adc_p));
        pressure = (((pressure << 31) - var2) * Wrapping(3125)) / var1;
        var1 = (p(self.p9) * (pressure >> 13) * (pressure >> 13)) >> 25;
        var2 = (p(self.p8) * pressure) >> 19;
        pressure = ((pressure + var1 + var2) >> 8) + (p(self.p7) << 4);
        pressure.0 as u32
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Worked example from the datasheet, as it appears on the bus
    pub(crate) const DATASHEET_BLOCK: [u8; CALIBRATION_LEN] = [
        0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C,
        0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17, 0x00, 0x00,
    ];

    #[test]
    fn test_decodes_signed_and_unsigned_words() {
        let cal = Calibration::from_bytes(&DATASHEET_BLOCK);
        assert_eq!(
            cal,
            Calibration {
                t1: 27504,
                t2: 26435,
                t3: -1000,
                p1: 36477,
                p2: -10685,
                p3: 3024,
                p4: 2855,
                p5: 140,
                p6: -7,
                p7: 15500,
                p8: -14600,
                p9: 6000,
            }
        );
    }

    #[test]
    fn test_datasheet_example() {
        let cal = Calibration::from_bytes(&DATASHEET_BLOCK);

        let (temperature, t_fine) = cal.compensate_temperature(519_888);
        assert_eq!(t_fine, 128_422);
        assert_eq!(temperature, 2508);

        let pressure = cal.compensate_pressure(415_148, t_fine);
        assert_eq!(pressure, 25_767_233);
        // 100653.25 Pa
        assert_eq!(pressure / 256, 100_653);
    }

    #[test]
    fn test_zero_p1_yields_zero_pressure() {
        let mut cal = Calibration::from_bytes(&DATASHEET_BLOCK);
        cal.p1 = 0;
        assert_eq!(cal.compensate_pressure(415_148, 128_422), 0);
    }

    #[test]
    fn test_extreme_codes_do_not_panic() {
        let cal = Calibration::from_bytes(&DATASHEET_BLOCK);
        for adc in [0, 0x80000, 0xFFFFF] {
            let (_, t_fine) = cal.compensate_temperature(adc);
            let _ = cal.compensate_pressure(adc, t_fine);
        }
    }
}
