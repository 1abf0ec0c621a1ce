/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! EFI device path encoding.
//!
//! The pre-boot updater locates the staged capsule through a packed device
//! path chain stored in the UPDATE_INFO variable: an HD() node naming the
//! ESP partition, a File() node with the UCS-2 relative path, and an
//! End-Entire terminator.  Malformed inputs are rejected when a node is
//! built, not when the chain is serialized.

use crate::error::{Error, Result};
use crate::ucs2;

const TYPE_MEDIA: u8 = 0x04;
const SUBTYPE_HARD_DRIVE: u8 = 0x01;
const SUBTYPE_FILE_PATH: u8 = 0x04;
const TYPE_END: u8 = 0x7F;
const SUBTYPE_END_ENTIRE: u8 = 0xFF;

/// HD() node payload is fixed-size: 4 + 8 + 8 + 16 + 1 + 1 plus the header.
const HARD_DRIVE_NODE_LEN: u16 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartitionScheme {
    Mbr,
    Gpt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HardDriveNode {
    pub(crate) partition_number: u32,
    pub(crate) partition_start: u64,
    pub(crate) partition_size: u64,
    /// GPT partition GUID in mixed-endian layout, or the 4-byte MBR disk
    /// signature zero-padded.
    pub(crate) signature: [u8; 16],
    pub(crate) scheme: PartitionScheme,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DevicePathNode {
    HardDrive(HardDriveNode),
    FilePath(String),
    EndEntire,
    /// Nodes we do not interpret are carried through untouched.
    Other {
        node_type: u8,
        subtype: u8,
        data: Vec<u8>,
    },
}

impl DevicePathNode {
    /// Build a File() node; the path must be UCS-2 encodable.
    pub(crate) fn file_path(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        ucs2::utf8_to_ucs2(&path)?;
        Ok(DevicePathNode::FilePath(path))
    }

    fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            DevicePathNode::HardDrive(hd) => {
                buf.push(TYPE_MEDIA);
                buf.push(SUBTYPE_HARD_DRIVE);
                buf.extend_from_slice(&HARD_DRIVE_NODE_LEN.to_le_bytes());
                buf.extend_from_slice(&hd.partition_number.to_le_bytes());
                buf.extend_from_slice(&hd.partition_start.to_le_bytes());
                buf.extend_from_slice(&hd.partition_size.to_le_bytes());
                buf.extend_from_slice(&hd.signature);
                match hd.scheme {
                    PartitionScheme::Mbr => {
                        buf.push(0x01);
                        buf.push(0x01);
                    }
                    PartitionScheme::Gpt => {
                        buf.push(0x02);
                        buf.push(0x02);
                    }
                }
            }
            DevicePathNode::FilePath(path) => {
                let encoded = ucs2::utf8_to_ucs2(path)?;
                let len = 4 + encoded.len();
                if len > u16::MAX as usize {
                    return Err(Error::InvalidData(format!(
                        "file path too long for a device path node: {len} bytes"
                    )));
                }
                buf.push(TYPE_MEDIA);
                buf.push(SUBTYPE_FILE_PATH);
                buf.extend_from_slice(&(len as u16).to_le_bytes());
                buf.extend_from_slice(&encoded);
            }
            DevicePathNode::EndEntire => {
                buf.push(TYPE_END);
                buf.push(SUBTYPE_END_ENTIRE);
                buf.extend_from_slice(&4u16.to_le_bytes());
            }
            DevicePathNode::Other {
                node_type,
                subtype,
                data,
            } => {
                let len = 4 + data.len();
                if len > u16::MAX as usize {
                    return Err(Error::InvalidData("device path node too long".to_string()));
                }
                buf.push(*node_type);
                buf.push(*subtype);
                buf.extend_from_slice(&(len as u16).to_le_bytes());
                buf.extend_from_slice(data);
            }
        }
        Ok(())
    }
}

/// Serialize a node chain, appending the End-Entire terminator.
pub(crate) fn serialize(nodes: &[DevicePathNode]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for node in nodes {
        if matches!(node, DevicePathNode::EndEntire) {
            break;
        }
        node.serialize_into(&mut buf)?;
    }
    DevicePathNode::EndEntire.serialize_into(&mut buf)?;
    Ok(buf)
}

/// Parse a packed device path chain up to (and consuming) End-Entire.
pub(crate) fn parse(buf: &[u8]) -> Result<Vec<DevicePathNode>> {
    let mut nodes = Vec::new();
    let mut offset = 0usize;
    loop {
        if buf.len() < offset + 4 {
            return Err(Error::InvalidData(
                "device path truncated before End-Entire".to_string(),
            ));
        }
        let node_type = buf[offset];
        let subtype = buf[offset + 1];
        let length = u16::from_le_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        log::trace!("DP type:0x{node_type:02x} subtype:0x{subtype:02x} size:0x{length:04x}");
        if length < 4 || offset + length > buf.len() {
            return Err(Error::InvalidData(format!(
                "device path node length invalid: 0x{length:04x}"
            )));
        }
        let data = &buf[offset + 4..offset + length];
        match (node_type, subtype) {
            (TYPE_END, SUBTYPE_END_ENTIRE) => break,
            (TYPE_MEDIA, SUBTYPE_HARD_DRIVE) => {
                if length != HARD_DRIVE_NODE_LEN as usize {
                    return Err(Error::InvalidData(format!(
                        "HD() node has length 0x{length:04x}"
                    )));
                }
                let mut signature = [0u8; 16];
                signature.copy_from_slice(&data[20..36]);
                let scheme = match data[36] {
                    0x01 => PartitionScheme::Mbr,
                    0x02 => PartitionScheme::Gpt,
                    other => {
                        return Err(Error::InvalidData(format!(
                            "unknown partition format 0x{other:02x}"
                        )))
                    }
                };
                nodes.push(DevicePathNode::HardDrive(HardDriveNode {
                    partition_number: u32::from_le_bytes(data[0..4].try_into().unwrap()),
                    partition_start: u64::from_le_bytes(data[4..12].try_into().unwrap()),
                    partition_size: u64::from_le_bytes(data[12..20].try_into().unwrap()),
                    signature,
                    scheme,
                }));
            }
            (TYPE_MEDIA, SUBTYPE_FILE_PATH) => {
                nodes.push(DevicePathNode::FilePath(ucs2::ucs2_to_string(data)));
            }
            _ => nodes.push(DevicePathNode::Other {
                node_type,
                subtype,
                data: data.to_vec(),
            }),
        }
        offset += length;
    }
    Ok(nodes)
}

/// The File() node of a chain, if any.
pub(crate) fn find_file_path(nodes: &[DevicePathNode]) -> Option<&str> {
    nodes.iter().find_map(|n| match n {
        DevicePathNode::FilePath(p) => Some(p.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hd() -> DevicePathNode {
        DevicePathNode::HardDrive(HardDriveNode {
            partition_number: 1,
            partition_start: 0x800,
            partition_size: 0x100000,
            signature: *uuid::uuid!("94ff4025-5276-4bec-adea-e98da271b64c").as_bytes(),
            scheme: PartitionScheme::Gpt,
        })
    }

    #[test]
    fn test_roundtrip() -> crate::error::Result<()> {
        let nodes = vec![
            sample_hd(),
            DevicePathNode::file_path("\\EFI\\fedora\\fw\\fwupd-ddc0ee61.cap")?,
        ];
        let buf = serialize(&nodes)?;
        // HD() + File() + End-Entire
        assert_eq!(buf[0], 0x04);
        assert_eq!(buf[1], 0x01);
        assert_eq!(&buf[buf.len() - 4..], &[0x7F, 0xFF, 0x04, 0x00]);
        let parsed = parse(&buf)?;
        assert_eq!(parsed, nodes);
        assert_eq!(
            find_file_path(&parsed),
            Some("\\EFI\\fedora\\fw\\fwupd-ddc0ee61.cap")
        );
        Ok(())
    }

    #[test]
    fn test_unknown_node_carried() -> crate::error::Result<()> {
        let nodes = vec![
            DevicePathNode::Other {
                node_type: 0x01,
                subtype: 0x01,
                data: vec![0xAA, 0xBB],
            },
            sample_hd(),
        ];
        let buf = serialize(&nodes)?;
        assert_eq!(parse(&buf)?, nodes);
        Ok(())
    }

    #[test]
    fn test_malformed() {
        // no End-Entire
        assert!(parse(&[0x04, 0x01, 0x2A, 0x00]).is_err());
        // length smaller than the header
        assert!(parse(&[0x04, 0x04, 0x02, 0x00, 0x7F, 0xFF, 0x04, 0x00]).is_err());
        // empty buffer
        assert!(parse(&[]).is_err());
        // non-BMP file path refused at build time
        assert!(DevicePathNode::file_path("\\EFI\\\u{1F600}.cap").is_err());
    }
}
