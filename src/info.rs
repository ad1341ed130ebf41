//! Negotiated connection and enumeration data
//!
//! Fixed-layout blocks exchanged with the broker: the per-session
//! [`ConInfo`] parameter block, the broker's [`ServerInfo`], and the
//! target/client enumeration records. All decode from and encode to the
//! exact little-endian wire layouts; the device-id hash fields of `ConInfo`
//! are always recomputed locally and never trusted from the wire.

use crate::packet::{name_str, PktReader, PktWriter, Truncated};
use crate::utils;
use crate::wire::{DevConPhys, NAME_LEN16, NAME_LEN32, NAME_LEN64, NAME_LEN8};

/// Wire size of a [`ConInfo`] block
pub const CON_INFO_SIZE: usize = 124;
/// Wire size of a [`ServerInfo`] block
pub const SERVER_INFO_SIZE: usize = 120;
/// Wire size of a [`TargetInfo`] record
pub const TARGET_INFO_SIZE: usize = 88;
/// Wire size of a [`TargetClientInfo`] record
pub const TARGET_CLIENT_INFO_SIZE: usize = 80;

/// Negotiated connection parameters, valid for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConInfo {
    /// Maximum size of a PL2 request packet
    pub max_pl2rq_pkt_size: u32,
    /// Maximum size of a PL2 response packet
    pub max_pl2rsp_pkt_size: u32,
    /// Device type identifier (IEEE 1149.1 device id), 0 if no device
    pub device_type: u32,
    /// 128-bit unique device id, all zeroes if none
    pub device_id: [u32; 4],
    /// IPv4 address of the device for direct Ethernet access, 0 otherwise
    pub ipv4_addr: u32,
    /// Supported connection features
    pub dev_con_feat: u16,
    /// Physical transport class
    pub dev_con_phys: DevConPhys,
    /// Maximum number of RW micro-ops per PL1 envelope
    pub pl0_max_num_rw: u8,
    /// Supported RW access-mode bits
    pub pl0_rw_mode_mask: u16,
    /// Supported address maps, bit 15 for map 15
    pub pl0_addr_map_mask: u16,
    /// Maximum client-to-device message length, 0 if channels unsupported
    pub msg_length_c2d: u16,
    /// Maximum device-to-client message length, 0 if channels unsupported
    pub msg_length_d2c: u16,
    /// Device-side buffer depth for client-to-device messages
    pub msg_num_c2d: u8,
    /// Device-side buffer depth for device-to-client messages
    pub msg_num_d2c: u8,
    /// Access-hardware name or device IP address, empty if not connected
    pub identifier: [u8; NAME_LEN64],
    /// CRC32 of the 128-bit device id, computed locally
    pub device_id_hash: u32,
    /// 6-character rendering of the hash, `NoUid` for an all-zero id
    pub device_id_hash_str: [u8; NAME_LEN8],
}

impl Default for ConInfo {
    fn default() -> Self {
        Self {
            max_pl2rq_pkt_size: 0,
            max_pl2rsp_pkt_size: 0,
            device_type: 0,
            device_id: [0; 4],
            ipv4_addr: 0,
            dev_con_feat: 0,
            dev_con_phys: DevConPhys::Unknown,
            pl0_max_num_rw: 0,
            pl0_rw_mode_mask: 0,
            pl0_addr_map_mask: 0,
            msg_length_c2d: 0,
            msg_length_d2c: 0,
            msg_num_c2d: 0,
            msg_num_d2c: 0,
            identifier: [0; NAME_LEN64],
            device_id_hash: 0,
            device_id_hash_str: [0; NAME_LEN8],
        }
    }
}

impl ConInfo {
    pub fn decode(r: &mut PktReader<'_>) -> Result<Self, Truncated> {
        let max_pl2rq_pkt_size = r.take_u32()?;
        let max_pl2rsp_pkt_size = r.take_u32()?;
        let device_type = r.take_u32()?;
        let mut device_id = [0u32; 4];
        for w in &mut device_id {
            *w = r.take_u32()?;
        }
        let ipv4_addr = r.take_u32()?;
        let dev_con_feat = r.take_u16()?;
        let dev_con_phys = DevConPhys::from_value(r.take_u8()?);
        let pl0_max_num_rw = r.take_u8()?;
        let pl0_rw_mode_mask = r.take_u16()?;
        let pl0_addr_map_mask = r.take_u16()?;
        let msg_length_c2d = r.take_u16()?;
        let msg_length_d2c = r.take_u16()?;
        let msg_num_c2d = r.take_u8()?;
        let msg_num_d2c = r.take_u8()?;
        r.skip(2)?; // reserved
        let identifier = r.take_name::<NAME_LEN64>()?;
        r.skip(4 + NAME_LEN8)?; // hash fields, recomputed below

        let mut info = Self {
            max_pl2rq_pkt_size,
            max_pl2rsp_pkt_size,
            device_type,
            device_id,
            ipv4_addr,
            dev_con_feat,
            dev_con_phys,
            pl0_max_num_rw,
            pl0_rw_mode_mask,
            pl0_addr_map_mask,
            msg_length_c2d,
            msg_length_d2c,
            msg_num_c2d,
            msg_num_d2c,
            identifier,
            device_id_hash: 0,
            device_id_hash_str: [0; NAME_LEN8],
        };
        info.rehash();
        Ok(info)
    }

    pub fn encode(&self, w: &mut PktWriter) {
        w.push_u32(self.max_pl2rq_pkt_size);
        w.push_u32(self.max_pl2rsp_pkt_size);
        w.push_u32(self.device_type);
        for word in self.device_id {
            w.push_u32(word);
        }
        w.push_u32(self.ipv4_addr);
        w.push_u16(self.dev_con_feat);
        w.push_u8(self.dev_con_phys as u8);
        w.push_u8(self.pl0_max_num_rw);
        w.push_u16(self.pl0_rw_mode_mask);
        w.push_u16(self.pl0_addr_map_mask);
        w.push_u16(self.msg_length_c2d);
        w.push_u16(self.msg_length_d2c);
        w.push_u8(self.msg_num_c2d);
        w.push_u8(self.msg_num_d2c);
        w.push_u16(0);
        w.push_bytes(&self.identifier);
        w.push_u32(self.device_id_hash);
        w.push_bytes(&self.device_id_hash_str);
    }

    /// Recompute `device_id_hash` and `device_id_hash_str` from `device_id`.
    pub fn rehash(&mut self) {
        if self.device_id == [0; 4] {
            self.device_id_hash = 0;
            self.device_id_hash_str = *b"NoUid\0\0\0";
        } else {
            let mut bytes = [0u8; 16];
            for (i, w) in self.device_id.iter().enumerate() {
                bytes[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
            }
            self.device_id_hash = utils::crc32(&bytes);
            let s = utils::hash32_to_str(self.device_id_hash);
            self.device_id_hash_str = [s[0], s[1], s[2], s[3], s[4], s[5], 0, 0];
        }
    }

    pub fn identifier_str(&self) -> &str {
        name_str(&self.identifier)
    }

    pub fn device_id_hash_str(&self) -> &str {
        name_str(&self.device_id_hash_str)
    }
}

/// Broker information returned by the initial connect exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_name: [u8; NAME_LEN64],
    pub v_minor: u16,
    pub v_major: u16,
    /// Supported protocol versions, one bit per version number
    pub supp_protoc_ver: u32,
    /// Supported channel targets, one bit per target
    pub supp_chl_target: u32,
    /// Supported trace stream types, one bit per type
    pub supp_trc_type: u32,
    /// Build date string of the server binary
    pub date: [u8; 16],
    /// Server start time, microseconds since the Unix epoch
    pub start_time_us: u64,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            server_name: [0; NAME_LEN64],
            v_minor: 0,
            v_major: 0,
            supp_protoc_ver: 0,
            supp_chl_target: 0,
            supp_trc_type: 0,
            date: [0; 16],
            start_time_us: 0,
        }
    }
}

impl ServerInfo {
    pub fn decode(r: &mut PktReader<'_>) -> Result<Self, Truncated> {
        let server_name = r.take_name::<NAME_LEN64>()?;
        let v_minor = r.take_u16()?;
        let v_major = r.take_u16()?;
        let supp_protoc_ver = r.take_u32()?;
        let supp_chl_target = r.take_u32()?;
        let supp_trc_type = r.take_u32()?;
        r.skip(16)?; // reserved
        let date = r.take_name::<16>()?;
        let start_time_us = r.take_u64()?;
        Ok(Self {
            server_name,
            v_minor,
            v_major,
            supp_protoc_ver,
            supp_chl_target,
            supp_trc_type,
            date,
            start_time_us,
        })
    }

    pub fn encode(&self, w: &mut PktWriter) {
        w.push_bytes(&self.server_name);
        w.push_u16(self.v_minor);
        w.push_u16(self.v_major);
        w.push_u32(self.supp_protoc_ver);
        w.push_u32(self.supp_chl_target);
        w.push_u32(self.supp_trc_type);
        w.push_bytes(&[0; 16]);
        w.push_bytes(&self.date);
        w.push_u64(self.start_time_us);
    }

    pub fn server_name_str(&self) -> &str {
        name_str(&self.server_name)
    }

    pub fn date_str(&self) -> &str {
        name_str(&self.date)
    }

    /// Server start time as `YYYY-MM-DD HH:MM:SS` (UTC)
    pub fn start_time_str(&self) -> String {
        crate::utils::time_str(self.start_time_us)
    }
}

/// One enumerable target behind the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    /// Unique access-hardware name or device IP address
    pub identifier: [u8; NAME_LEN64],
    /// Device type identifier, 0 if no device connected
    pub device_type: u32,
    /// 128-bit unique device id
    pub device_id: [u32; 4],
    pub dev_con_phys: DevConPhys,
    /// Number of clients currently attached to this target
    pub num_client: u8,
}

impl TargetInfo {
    pub fn decode(r: &mut PktReader<'_>) -> Result<Self, Truncated> {
        let identifier = r.take_name::<NAME_LEN64>()?;
        let device_type = r.take_u32()?;
        let mut device_id = [0u32; 4];
        for w in &mut device_id {
            *w = r.take_u32()?;
        }
        let dev_con_phys = DevConPhys::from_value(r.take_u8()?);
        let num_client = r.take_u8()?;
        r.skip(2)?;
        Ok(Self {
            identifier,
            device_type,
            device_id,
            dev_con_phys,
            num_client,
        })
    }

    pub fn encode(&self, w: &mut PktWriter) {
        w.push_bytes(&self.identifier);
        w.push_u32(self.device_type);
        for word in self.device_id {
            w.push_u32(word);
        }
        w.push_u8(self.dev_con_phys as u8);
        w.push_u8(self.num_client);
        w.push_u16(0);
    }

    pub fn identifier_str(&self) -> &str {
        name_str(&self.identifier)
    }
}

/// One client attached to a target, as enumerated by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetClientInfo {
    pub client_name: [u8; NAME_LEN32],
    pub user_name: [u8; NAME_LEN16],
    pub client_pid: u32,
    /// Client kind (RW, channel, trace), raw wire value
    pub client_type: u8,
    /// Microseconds since the server start time
    pub client_connect_time: u64,
    /// Bytes the client has sent to the server
    pub num_byte_c2s: u64,
    /// Bytes the client has received from the server
    pub num_byte_s2c: u64,
}

impl TargetClientInfo {
    pub fn decode(r: &mut PktReader<'_>) -> Result<Self, Truncated> {
        let client_name = r.take_name::<NAME_LEN32>()?;
        let user_name = r.take_name::<NAME_LEN16>()?;
        let client_pid = r.take_u32()?;
        let client_type = r.take_u8()?;
        r.skip(3)?;
        let client_connect_time = r.take_u64()?;
        let num_byte_c2s = r.take_u64()?;
        let num_byte_s2c = r.take_u64()?;
        Ok(Self {
            client_name,
            user_name,
            client_pid,
            client_type,
            client_connect_time,
            num_byte_c2s,
            num_byte_s2c,
        })
    }

    pub fn encode(&self, w: &mut PktWriter) {
        w.push_bytes(&self.client_name);
        w.push_bytes(&self.user_name);
        w.push_u32(self.client_pid);
        w.push_u8(self.client_type);
        w.push_bytes(&[0; 3]);
        w.push_u64(self.client_connect_time);
        w.push_u64(self.num_byte_c2s);
        w.push_u64(self.num_byte_s2c);
    }

    pub fn client_name_str(&self) -> &str {
        name_str(&self.client_name)
    }

    pub fn user_name_str(&self) -> &str {
        name_str(&self.user_name)
    }
}

/// Reset counters maintained by the broker for the connected device.
///
/// The detection possibilities depend on the access path and device type.
/// The initial value can differ from 0 if another client already
/// established a device connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetCount {
    /// Detected power-on resets
    pub porst: u32,
    /// Detected resets
    pub reset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_con_info() -> ConInfo {
        let mut ci = ConInfo {
            max_pl2rq_pkt_size: 0x10000,
            max_pl2rsp_pkt_size: 0x4000,
            device_type: 0x101D_C083,
            device_id: [0x1111_1111, 0x2222_2222, 0x3333_3333, 0x4444_4444],
            ipv4_addr: 0,
            dev_con_feat: 0x0003,
            dev_con_phys: DevConPhys::Dap,
            pl0_max_num_rw: 32,
            pl0_rw_mode_mask: 1,
            pl0_addr_map_mask: 0x8003,
            msg_length_c2d: 256,
            msg_length_d2c: 256,
            msg_num_c2d: 4,
            msg_num_d2c: 4,
            identifier: [0; NAME_LEN64],
            device_id_hash: 0,
            device_id_hash_str: [0; NAME_LEN8],
        };
        ci.identifier[..7].copy_from_slice(b"probe01");
        ci.rehash();
        ci
    }

    #[test]
    fn con_info_round_trip() {
        let ci = sample_con_info();
        let mut w = PktWriter::new();
        ci.encode(&mut w);
        assert_eq!(w.len(), CON_INFO_SIZE);

        let mut r = PktReader::new(w.as_bytes());
        let back = ConInfo::decode(&mut r).unwrap();
        assert_eq!(back, ci);
        assert_eq!(back.identifier_str(), "probe01");
    }

    #[test]
    fn zero_device_id_yields_no_uid() {
        let mut ci = sample_con_info();
        ci.device_id = [0; 4];
        ci.rehash();
        assert_eq!(ci.device_id_hash, 0);
        assert_eq!(ci.device_id_hash_str(), "NoUid");
    }

    #[test]
    fn hash_str_is_a_function_of_the_crc() {
        let ci = sample_con_info();
        let mut other = sample_con_info();
        other.identifier[0] = b'x'; // hash only depends on the id
        other.rehash();
        assert_eq!(ci.device_id_hash, other.device_id_hash);
        assert_eq!(ci.device_id_hash_str, other.device_id_hash_str);
        assert_eq!(ci.device_id_hash_str().len(), 6);
    }

    #[test]
    fn server_info_round_trip() {
        let mut si = ServerInfo {
            v_minor: 2,
            v_major: 1,
            supp_protoc_ver: 0x2,
            supp_chl_target: 0x2,
            supp_trc_type: 0,
            start_time_us: 1_700_000_000_000_000,
            ..Default::default()
        };
        si.server_name[..6].copy_from_slice(b"broker");
        si.date[..11].copy_from_slice(b"Jul  1 2025");

        let mut w = PktWriter::new();
        si.encode(&mut w);
        assert_eq!(w.len(), SERVER_INFO_SIZE);
        let back = ServerInfo::decode(&mut PktReader::new(w.as_bytes())).unwrap();
        assert_eq!(back, si);
    }

    #[test]
    fn target_and_client_records_round_trip() {
        let mut ti = TargetInfo {
            identifier: [0; NAME_LEN64],
            device_type: 0xABCD,
            device_id: [1, 2, 3, 4],
            dev_con_phys: DevConPhys::Jtag,
            num_client: 2,
        };
        ti.identifier[..4].copy_from_slice(b"tap0");
        let mut w = PktWriter::new();
        ti.encode(&mut w);
        assert_eq!(w.len(), TARGET_INFO_SIZE);
        let back = TargetInfo::decode(&mut PktReader::new(w.as_bytes())).unwrap();
        assert_eq!(back, ti);

        let mut tci = TargetClientInfo {
            client_name: [0; NAME_LEN32],
            user_name: [0; NAME_LEN16],
            client_pid: 1234,
            client_type: 1,
            client_connect_time: 55,
            num_byte_c2s: 10,
            num_byte_s2c: 20,
        };
        tci.client_name[..4].copy_from_slice(b"dbg1");
        let mut w = PktWriter::new();
        tci.encode(&mut w);
        assert_eq!(w.len(), TARGET_CLIENT_INFO_SIZE);
        let back = TargetClientInfo::decode(&mut PktReader::new(w.as_bytes())).unwrap();
        assert_eq!(back, tci);
    }
}
