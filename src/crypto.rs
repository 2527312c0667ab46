//! Classic ZipCrypto stream cipher
//!
//! The PKWARE scheme keys three 32-bit state words from the password, then
//! XORs each payload byte with a keystream byte derived from the third
//! word. Key updates always consume the plaintext byte, so encryption and
//! decryption mirror each other. Every encrypted entry starts with a
//! 12-byte header whose last byte doubles as a cheap password check.

use std::io::{Read, Write};

use crate::error::{Result, ZuError};
use crate::headers::{ENCRYPTION_HEADER_LEN, FLAG_DATA_DESCRIPTOR};

const KEY0_SEED: u32 = 0x1234_5678;
const KEY1_SEED: u32 = 0x2345_6789;
const KEY2_SEED: u32 = 0x3456_7890;

// Single-byte CRC steps over the PKZIP polynomial. The streaming hasher
// from crc32fast cannot be advanced one byte at a time against existing
// state, so the key schedule keeps its own table.
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

fn crc32_step(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
}

/// The three-word cipher state.
#[derive(Debug, Clone)]
pub struct Keys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl Keys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Keys {
            k0: KEY0_SEED,
            k1: KEY1_SEED,
            k2: KEY2_SEED,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.k0 = crc32_step(self.k0, plain);
        self.k1 = self.k1.wrapping_add(self.k0 & 0xFF);
        self.k1 = self.k1.wrapping_mul(134_775_813).wrapping_add(1);
        self.k2 = crc32_step(self.k2, (self.k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let t = (self.k2 | 2) as u16;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }
}

/// Check byte expected at the end of the decrypted 12-byte header: the
/// high byte of the DOS time when sizes live in a data descriptor, the
/// high byte of the CRC otherwise.
pub fn expected_check_byte(flags: u16, crc32: u32, dos_time: u16) -> u8 {
    if flags & FLAG_DATA_DESCRIPTOR != 0 {
        (dos_time >> 8) as u8
    } else {
        (crc32 >> 24) as u8
    }
}

/// Build the encrypted 12-byte entry header: 11 random bytes plus the
/// check byte, encrypted in place and leaving `keys` primed for the
/// payload.
pub fn make_encryption_header(keys: &mut Keys, check_byte: u8) -> Result<[u8; ENCRYPTION_HEADER_LEN]> {
    let mut header = [0u8; ENCRYPTION_HEADER_LEN];
    getrandom::getrandom(&mut header[..ENCRYPTION_HEADER_LEN - 1])
        .map_err(|e| ZuError::invalid_data(format!("random source failed: {}", e)))?;
    header[ENCRYPTION_HEADER_LEN - 1] = check_byte;
    for b in header.iter_mut() {
        *b = keys.encrypt_byte(*b);
    }
    Ok(header)
}

/// Decrypt a 12-byte entry header and compare the check byte, leaving
/// `keys` primed for the payload. A mismatch means the password is wrong.
pub fn verify_encryption_header(
    keys: &mut Keys,
    header: &[u8; ENCRYPTION_HEADER_LEN],
    check_byte: u8,
) -> bool {
    let mut last = 0u8;
    for &b in header.iter() {
        last = keys.decrypt_byte(b);
    }
    last == check_byte
}

/// Decrypting adapter over a compressed-byte reader.
pub struct DecryptReader<R: Read> {
    inner: R,
    keys: Keys,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, keys: Keys) -> Self {
        DecryptReader { inner, keys }
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        for b in buf[..n].iter_mut() {
            *b = self.keys.decrypt_byte(*b);
        }
        Ok(n)
    }
}

/// Encrypting adapter over the output sink.
pub struct EncryptWriter<W: Write> {
    inner: W,
    keys: Keys,
    scratch: Vec<u8>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(inner: W, keys: Keys) -> Self {
        EncryptWriter {
            inner,
            keys,
            scratch: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.scratch.clear();
        self.scratch.reserve(buf.len());
        for &b in buf {
            let c = self.keys.encrypt_byte(b);
            self.scratch.push(c);
        }
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_round_trips() {
        let plain = b"attack at dawn, bring snacks".to_vec();
        let mut enc = Keys::new(b"secret");
        let cipher: Vec<u8> = plain.iter().map(|&b| enc.encrypt_byte(b)).collect();
        assert_ne!(cipher, plain);
        let mut dec = Keys::new(b"secret");
        let back: Vec<u8> = cipher.iter().map(|&b| dec.decrypt_byte(b)).collect();
        assert_eq!(back, plain);
    }

    #[test]
    fn header_verifies_with_matching_password_only() {
        let mut enc = Keys::new(b"hunter2");
        let header = make_encryption_header(&mut enc, 0xAB).unwrap();
        let mut dec = Keys::new(b"hunter2");
        assert!(verify_encryption_header(&mut dec, &header, 0xAB));
    }

    #[test]
    fn stream_adapters_mirror() {
        let plain = b"0123456789abcdef".repeat(64);
        let mut cipher = Vec::new();
        {
            let mut w = EncryptWriter::new(&mut cipher, Keys::new(b"pw"));
            w.write_all(&plain).unwrap();
        }
        let mut back = Vec::new();
        DecryptReader::new(&cipher[..], Keys::new(b"pw"))
            .read_to_end(&mut back)
            .unwrap();
        assert_eq!(back, plain);
    }

    #[test]
    fn check_byte_source_depends_on_descriptor_flag() {
        assert_eq!(expected_check_byte(0, 0xAABB_CCDD, 0x1122), 0xAA);
        assert_eq!(
            expected_check_byte(FLAG_DATA_DESCRIPTOR, 0xAABB_CCDD, 0x1122),
            0x11
        );
    }
}
