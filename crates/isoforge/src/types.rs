use core::marker::PhantomData;

use chrono::{DateTime, Datelike, FixedOffset, Timelike};

/// A restricted ASCII alphabet from ECMA-119.
pub trait Charset: Copy + PartialEq + Eq {
    fn contains(byte: u8) -> bool;

    fn validate(bytes: &[u8]) -> bool {
        bytes.iter().all(|&b| Self::contains(b))
    }
}

fn is_d_char(byte: u8) -> bool {
    byte.is_ascii_digit() || byte.is_ascii_uppercase() || byte == b'_'
}

/// The `a-characters` set: d-characters plus space and `!"%&'()*+,-./:;<=>?`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetA;

/// The `d-characters` set: `0-9`, `A-Z` and `_`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetD;

/// File identifiers: d-characters plus the `.` and `;` separators.
/// `~` is admitted for the tilde aliases produced on name collisions.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetFile;

impl Charset for CharsetA {
    fn contains(byte: u8) -> bool {
        const SYMBOLS: &[u8] = b" !\"%&'()*+,-./:;<=>?";
        is_d_char(byte) || SYMBOLS.contains(&byte)
    }
}

impl Charset for CharsetD {
    fn contains(byte: u8) -> bool {
        is_d_char(byte)
    }
}

impl Charset for CharsetFile {
    fn contains(byte: u8) -> bool {
        is_d_char(byte) || byte == b'.' || byte == b';' || byte == b'~'
    }
}

/// A fixed-length string field, padded to `N` bytes with a fill byte.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct IsoStr<C: Charset, const N: usize> {
    chars: [u8; N],
    _marker: PhantomData<C>,
}

unsafe impl<C: Charset, const N: usize> bytemuck::Zeroable for IsoStr<C, N> {}
unsafe impl<C: Charset + 'static, const N: usize> bytemuck::Pod for IsoStr<C, N> {}

impl<C: Charset, const N: usize> IsoStr<C, N> {
    /// All spaces.
    pub fn empty() -> Self {
        Self::filled(b' ')
    }

    pub fn filled(pad: u8) -> Self {
        Self {
            chars: [pad; N],
            _marker: PhantomData,
        }
    }

    pub const fn from_bytes_exact(bytes: [u8; N]) -> Self {
        Self {
            chars: bytes,
            _marker: PhantomData,
        }
    }

    /// Encodes `s`, padding with spaces. Fails when `s` exceeds `N` bytes
    /// or contains a byte outside the character set.
    pub fn from_str(s: &str) -> Result<Self, &'static str> {
        Self::from_str_padded(s, b' ')
    }

    pub fn from_str_padded(s: &str, pad: u8) -> Result<Self, &'static str> {
        if s.len() > N {
            return Err("string does not fit the field");
        }
        if !C::validate(s.as_bytes()) {
            return Err("character outside the field's character set");
        }
        let mut chars = [pad; N];
        chars[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self {
            chars,
            _marker: PhantomData,
        })
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.chars
    }
}

impl<C: Charset, const N: usize> core::fmt::Debug for IsoStr<C, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let end = self
            .chars
            .iter()
            .rposition(|&c| c != b' ')
            .map_or(0, |p| p + 1);
        write!(f, "\"{}\"", String::from_utf8_lossy(&self.chars[..end]))
    }
}

pub type IsoStrA<const N: usize> = IsoStr<CharsetA, N>;
pub type IsoStrD<const N: usize> = IsoStr<CharsetD, N>;
pub type IsoStrFile<const N: usize> = IsoStr<CharsetFile, N>;

pub trait Endianness: Copy {
    fn get_u16(bytes: [u8; 2]) -> u16;
    fn set_u16(value: u16, bytes: &mut [u8; 2]);
    fn get_u32(bytes: [u8; 4]) -> u32;
    fn set_u32(value: u32, bytes: &mut [u8; 4]);
}

#[derive(Debug, Copy, Clone)]
pub struct LittleEndian;
#[derive(Debug, Copy, Clone)]
pub struct BigEndian;

impl Endianness for LittleEndian {
    #[inline]
    fn get_u16(bytes: [u8; 2]) -> u16 {
        u16::from_le_bytes(bytes)
    }

    #[inline]
    fn set_u16(value: u16, bytes: &mut [u8; 2]) {
        *bytes = value.to_le_bytes();
    }

    #[inline]
    fn get_u32(bytes: [u8; 4]) -> u32 {
        u32::from_le_bytes(bytes)
    }

    #[inline]
    fn set_u32(value: u32, bytes: &mut [u8; 4]) {
        *bytes = value.to_le_bytes();
    }
}

impl Endianness for BigEndian {
    #[inline]
    fn get_u16(bytes: [u8; 2]) -> u16 {
        u16::from_be_bytes(bytes)
    }

    #[inline]
    fn set_u16(value: u16, bytes: &mut [u8; 2]) {
        *bytes = value.to_be_bytes();
    }

    #[inline]
    fn get_u32(bytes: [u8; 4]) -> u32 {
        u32::from_be_bytes(bytes)
    }

    #[inline]
    fn set_u32(value: u32, bytes: &mut [u8; 4]) {
        *bytes = value.to_be_bytes();
    }
}

/// A `u16` stored with a fixed byte order.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct U16<E: Endianness> {
    bytes: [u8; 2],
    _marker: PhantomData<E>,
}

unsafe impl<E: Endianness> bytemuck::Zeroable for U16<E> {}
unsafe impl<E: Endianness + 'static> bytemuck::Pod for U16<E> {}

impl<E: Endianness> U16<E> {
    pub fn new(value: u16) -> Self {
        let mut bytes = [0; 2];
        E::set_u16(value, &mut bytes);
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> u16 {
        E::get_u16(self.bytes)
    }

    pub fn set(&mut self, value: u16) {
        E::set_u16(value, &mut self.bytes);
    }
}

impl<E: Endianness> core::fmt::Debug for U16<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("U16").field(&self.get()).finish()
    }
}

/// A `u32` stored with a fixed byte order.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct U32<E: Endianness> {
    bytes: [u8; 4],
    _marker: PhantomData<E>,
}

unsafe impl<E: Endianness> bytemuck::Zeroable for U32<E> {}
unsafe impl<E: Endianness + 'static> bytemuck::Pod for U32<E> {}

impl<E: Endianness> U32<E> {
    pub fn new(value: u32) -> Self {
        let mut bytes = [0; 4];
        E::set_u32(value, &mut bytes);
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> u32 {
        E::get_u32(self.bytes)
    }

    pub fn set(&mut self, value: u32) {
        E::set_u32(value, &mut self.bytes);
    }
}

impl<E: Endianness> core::fmt::Debug for U32<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("U32").field(&self.get()).finish()
    }
}

/// A both-endian `u16`: the little-endian form immediately followed by the
/// big-endian form (ECMA-119 7.2.3).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct U16LsbMsb {
    lsb: U16<LittleEndian>,
    msb: U16<BigEndian>,
}

impl U16LsbMsb {
    pub fn new(value: u16) -> Self {
        Self {
            lsb: U16::new(value),
            msb: U16::new(value),
        }
    }

    pub fn read(&self) -> u16 {
        self.lsb.get()
    }

    pub fn write(&mut self, value: u16) {
        self.lsb.set(value);
        self.msb.set(value);
    }
}

impl core::fmt::Debug for U16LsbMsb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("U16LsbMsb").field(&self.read()).finish()
    }
}

/// A both-endian `u32` (ECMA-119 7.3.3).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct U32LsbMsb {
    lsb: U32<LittleEndian>,
    msb: U32<BigEndian>,
}

impl U32LsbMsb {
    pub fn new(value: u32) -> Self {
        Self {
            lsb: U32::new(value),
            msb: U32::new(value),
        }
    }

    pub fn read(&self) -> u32 {
        self.lsb.get()
    }

    pub fn write(&mut self, value: u32) {
        self.lsb.set(value);
        self.msb.set(value);
    }
}

impl core::fmt::Debug for U32LsbMsb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("U32LsbMsb").field(&self.read()).finish()
    }
}

/// Offset from GMT in 15-minute units, from the total minutes of
/// (local − UTC), clamped to the representable −48..=+52 range.
pub fn gmt_offset_quarters(offset: FixedOffset) -> i8 {
    (offset.local_minus_utc() / 60 / 15).clamp(-48, 52) as i8
}

/// The 17-byte volume-descriptor date/time: sixteen ASCII digits
/// `YYYYMMDDhhmmssff` plus the GMT offset byte. An unset value is sixteen
/// `0` digits with a zero offset (ECMA-119 8.4.26.1).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct VolumeDateTime {
    digits: [u8; 16],
    gmt_offset: u8,
}

impl VolumeDateTime {
    pub fn unset() -> Self {
        Self {
            digits: [b'0'; 16],
            gmt_offset: 0,
        }
    }

    pub fn from_datetime(dt: &DateTime<FixedOffset>) -> Self {
        let text = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
            dt.year().clamp(0, 9999),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.nanosecond() / 10_000_000,
        );
        let mut digits = [b'0'; 16];
        digits.copy_from_slice(&text.as_bytes()[..16]);
        Self {
            digits,
            gmt_offset: gmt_offset_quarters(*dt.offset()) as u8,
        }
    }

    pub fn from_optional(dt: Option<&DateTime<FixedOffset>>) -> Self {
        dt.map_or_else(Self::unset, Self::from_datetime)
    }
}

impl core::fmt::Debug for VolumeDateTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VolumeDateTime")
            .field("digits", &String::from_utf8_lossy(&self.digits))
            .field("gmt_offset", &(self.gmt_offset as i8))
            .finish()
    }
}

/// The 7-byte recording date/time of a directory record: year since 1900,
/// month, day, hour, minute, second, GMT offset (ECMA-119 9.1.5).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct RecordingDateTime {
    pub years_since_1900: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub gmt_offset: u8,
}

impl RecordingDateTime {
    pub fn from_datetime(dt: &DateTime<FixedOffset>) -> Self {
        Self {
            years_since_1900: (dt.year() - 1900).clamp(0, 255) as u8,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            gmt_offset: gmt_offset_quarters(*dt.offset()) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn d_charset_accepts_exactly_the_37_characters() {
        let accepted: Vec<u8> = (0u8..=255).filter(|&b| CharsetD::contains(b)).collect();
        assert_eq!(accepted.len(), 37);
        assert!(CharsetD::validate(b"HELLO_123"));
        assert!(!CharsetD::validate(b"hello"));
        assert!(!CharsetD::validate(b"A.B"));
    }

    #[test]
    fn a_charset_is_a_superset_of_d() {
        assert!(CharsetA::validate(b"HELLO WORLD!"));
        assert!(CharsetA::validate(b"0-9:;<=>?"));
        assert!(!CharsetA::validate(b"lower"));
        assert!(!CharsetA::validate(b"#"));
    }

    #[test]
    fn file_charset_admits_separators_and_tilde() {
        assert!(CharsetFile::validate(b"README~1.TXT;1"));
        assert!(!CharsetFile::validate(b"A B"));
    }

    #[test]
    fn iso_str_pads_with_spaces() {
        let s = IsoStrD::<8>::from_str("ABC").unwrap();
        assert_eq!(s.as_bytes(), b"ABC     ");
        assert!(IsoStrD::<2>::from_str("ABC").is_err());
        assert!(IsoStrD::<8>::from_str("abc").is_err());
    }

    #[test]
    fn iso_str_accepts_an_explicit_pad_byte() {
        let s = IsoStrD::<4>::from_str_padded("AB", 0).unwrap();
        assert_eq!(s.as_bytes(), b"AB\0\0");
    }

    #[test]
    fn endian_wrappers_round_trip() {
        let mut le = U16::<LittleEndian>::new(0x1234);
        assert_eq!(bytemuck::bytes_of(&le), &[0x34, 0x12]);
        le.set(0x5678);
        assert_eq!(le.get(), 0x5678);

        let be = U32::<BigEndian>::new(0x0102_0304);
        assert_eq!(bytemuck::bytes_of(&be), &[1, 2, 3, 4]);
    }

    #[test]
    fn both_endian_halves_agree() {
        let v = U32LsbMsb::new(0xDEAD_BEEF);
        let bytes = bytemuck::bytes_of(&v);
        assert_eq!(u32::from_le_bytes(bytes[..4].try_into().unwrap()), 0xDEAD_BEEF);
        assert_eq!(u32::from_be_bytes(bytes[4..].try_into().unwrap()), 0xDEAD_BEEF);
    }

    #[test]
    fn volume_datetime_encoding() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let dt = tz.with_ymd_and_hms(2024, 3, 9, 4, 5, 6).unwrap();
        let enc = VolumeDateTime::from_datetime(&dt);
        assert_eq!(&enc.digits, b"2024030904050600");
        assert_eq!(enc.gmt_offset as i8, 8);

        let unset = VolumeDateTime::unset();
        assert_eq!(&unset.digits, &[b'0'; 16]);
        assert_eq!(unset.gmt_offset, 0);
    }

    #[test]
    fn recording_datetime_encoding() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let dt = tz.with_ymd_and_hms(1999, 12, 31, 23, 59, 58).unwrap();
        let enc = RecordingDateTime::from_datetime(&dt);
        assert_eq!(enc.years_since_1900, 99);
        assert_eq!(enc.month, 12);
        assert_eq!(enc.second, 58);
        assert_eq!(enc.gmt_offset as i8, -20);
    }

    #[test]
    fn gmt_offset_clamps_to_representable_range() {
        let east = FixedOffset::east_opt(14 * 3600).unwrap();
        assert_eq!(gmt_offset_quarters(east), 52);
        let west = FixedOffset::west_opt(13 * 3600).unwrap();
        assert_eq!(gmt_offset_quarters(west), -48);
    }
}
