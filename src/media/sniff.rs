//! Container detection from file headers
//!
//! Video files are not decoded. The header identifies the container and a
//! bounded scan of the file head looks for DRM markers.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes read for header sniffing
const HEADER_LEN: usize = 512;
/// Bytes scanned for encryption markers
const ENCRYPTION_SCAN_LEN: u64 = 1024 * 1024;

const ASF_HEADER_GUID: [u8; 16] = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
const ASF_CONTENT_ENCRYPTION_GUID: [u8; 16] = [
    0xFB, 0xB3, 0x11, 0x22, 0x23, 0xBD, 0xD2, 0x11, 0xB4, 0xB7, 0x00, 0xA0, 0xC9, 0x55, 0xFC, 0x6E,
];
const ASF_EXT_CONTENT_ENCRYPTION_GUID: [u8; 16] = [
    0x14, 0xE6, 0x8A, 0x29, 0x22, 0x26, 0x17, 0x4C, 0xB9, 0x35, 0xDA, 0xE0, 0x7E, 0xE9, 0x28, 0x9C,
];

/// MP4 sample entries and boxes only present in protected files
const MP4_PROTECTION_BOXES: &[&[u8; 4]] = &[b"encv", b"enca", b"drms", b"sinf"];

/// Read the first bytes of a file
pub fn read_header(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.by_ref()
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Identify a container from its header bytes
pub fn sniff_container(header: &[u8]) -> Option<&'static str> {
    // EBML: Matroska and WebM share the magic, the doctype tells them apart
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let doctype_area = &header[..header.len().min(64)];
        if contains(doctype_area, b"webm") {
            return Some("webm");
        }
        return Some("mkv");
    }

    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        if &header[8..12] == b"qt  " {
            return Some("mov");
        }
        return Some("mp4");
    }

    if header.len() >= 12 && header.starts_with(b"RIFF") {
        return match &header[8..12] {
            b"AVI " => Some("avi"),
            b"WAVE" => Some("wav"),
            _ => None,
        };
    }

    if header.starts_with(&ASF_HEADER_GUID) {
        return Some("asf");
    }

    if header.starts_with(&[0x00, 0x00, 0x01, 0xBA]) {
        return Some("mpegps");
    }

    // Transport stream: sync byte repeated every 188 bytes
    if header.len() > 188 && header[0] == 0x47 && header[188] == 0x47 {
        return Some("mpegts");
    }
    // M2TS carries a 4-byte timestamp before each 188-byte packet
    if header.len() > 196 && header[4] == 0x47 && header[196] == 0x47 {
        return Some("mpegts");
    }

    if header.starts_with(b"FLV") {
        return Some("flv");
    }

    if header.starts_with(b"OggS") {
        return Some("ogg");
    }

    None
}

/// Scan the head of a file for DRM markers
pub fn is_encrypted(path: &Path, container: &str) -> io::Result<bool> {
    let mut head = Vec::new();
    File::open(path)?
        .take(ENCRYPTION_SCAN_LEN)
        .read_to_end(&mut head)?;

    Ok(match container {
        "mp4" | "mov" => MP4_PROTECTION_BOXES
            .iter()
            .any(|marker| contains(&head, &marker[..])),
        "asf" => {
            contains(&head, &ASF_CONTENT_ENCRYPTION_GUID)
                || contains(&head, &ASF_EXT_CONTENT_ENCRYPTION_GUID)
        }
        _ => false,
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4_header(brand: &[u8; 4]) -> Vec<u8> {
        let mut header = vec![0x00, 0x00, 0x00, 0x18];
        header.extend_from_slice(b"ftyp");
        header.extend_from_slice(brand);
        header.extend_from_slice(&[0; 12]);
        header
    }

    #[test]
    fn test_sniff_common_containers() {
        assert_eq!(sniff_container(&mp4_header(b"isom")), Some("mp4"));
        assert_eq!(sniff_container(&mp4_header(b"qt  ")), Some("mov"));

        let mut mkv = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x82, 0x88];
        mkv.extend_from_slice(b"matroska");
        assert_eq!(sniff_container(&mkv), Some("mkv"));

        let mut webm = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x82, 0x84];
        webm.extend_from_slice(b"webm");
        assert_eq!(sniff_container(&webm), Some("webm"));

        let mut avi = b"RIFF".to_vec();
        avi.extend_from_slice(&[0, 0, 0, 0]);
        avi.extend_from_slice(b"AVI LIST");
        assert_eq!(sniff_container(&avi), Some("avi"));

        assert_eq!(sniff_container(b"FLV\x01\x05"), Some("flv"));
        assert_eq!(sniff_container(&[0x00, 0x00, 0x01, 0xBA, 0x44]), Some("mpegps"));
    }

    #[test]
    fn test_sniff_transport_stream() {
        let mut ts = vec![0u8; 400];
        ts[0] = 0x47;
        ts[188] = 0x47;
        assert_eq!(sniff_container(&ts), Some("mpegts"));
    }

    #[test]
    fn test_sniff_garbage() {
        assert_eq!(sniff_container(b"this is not a video file at all"), None);
        assert_eq!(sniff_container(&[]), None);
    }

    #[test]
    fn test_encrypted_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let clear = dir.path().join("clear.mp4");
        let locked = dir.path().join("locked.m4v");

        let mut data = mp4_header(b"M4V ");
        data.extend_from_slice(b"\x00\x00\x00\x10moov\x00\x00\x00\x08avc1");
        std::fs::write(&clear, &data).unwrap();
        data.extend_from_slice(b"\x00\x00\x00\x08encv\x00\x00\x00\x08sinf");
        std::fs::write(&locked, &data).unwrap();

        assert!(!is_encrypted(&clear, "mp4").unwrap());
        assert!(is_encrypted(&locked, "mp4").unwrap());
    }

    #[test]
    fn test_encrypted_asf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.wmv");
        let mut data = ASF_HEADER_GUID.to_vec();
        data.extend_from_slice(&[0; 14]);
        data.extend_from_slice(&ASF_CONTENT_ENCRYPTION_GUID);
        std::fs::write(&path, &data).unwrap();

        assert_eq!(sniff_container(&read_header(&path).unwrap()), Some("asf"));
        assert!(is_encrypted(&path, "asf").unwrap());
    }
}
