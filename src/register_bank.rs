/// THZ block bank for simulator-side data storage
///
/// This module provides thread-safe storage for register blocks as a heat
/// pump holds them, plus the routing that maps a write telegram
/// `(command, write offset)` onto bytes inside a block.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codec::{self, Value};
use crate::error::{ThzError, ThzResult};
use crate::protocol::BlockAddress;
use crate::register_map::{blocks, RegisterDescriptor, RegisterMap};

/// Where a write lands inside the block storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTarget {
    pub block: BlockAddress,
    pub offset: usize,
}

/// Block storage for a simulated heat pump
///
/// Cloning shares the storage, so a simulator and a test can hold the same
/// bank and observe each other's changes.
#[derive(Debug, Clone, Default)]
pub struct BlockBank {
    blocks: Arc<RwLock<HashMap<BlockAddress, Vec<u8>>>>,
    write_routes: Arc<RwLock<HashMap<(u8, u8), WriteTarget>>>,
}

impl BlockBank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Bank with a zeroed block for every block of `map` and a firmware block
    /// reporting `firmware_version`
    ///
    /// Every writable register of the map gets a write route.
    pub fn for_register_map(map: &RegisterMap, firmware_version: u16) -> ThzResult<Self> {
        let bank = Self::new();
        for block in map.blocks() {
            bank.set_block(block, vec![0; map.block_length(block)])?;
        }
        for register in map.registers() {
            if let Some(write) = register.write {
                bank.route_write(
                    write.command,
                    write.offset,
                    WriteTarget {
                        block: register.block,
                        offset: register.offset,
                    },
                )?;
            }
        }
        bank.set_firmware_version(firmware_version)?;
        Ok(bank)
    }

    /// Replace a block
    pub fn set_block(&self, block: BlockAddress, data: Vec<u8>) -> ThzResult<()> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|_| ThzError::internal("Failed to lock blocks"))?;
        blocks.insert(block, data);
        Ok(())
    }

    /// Read a block; unknown blocks are an [`ThzError::UnknownRegister`]
    pub fn read_block(&self, block: BlockAddress) -> ThzResult<Vec<u8>> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| ThzError::internal("Failed to lock blocks"))?;
        blocks
            .get(&block)
            .cloned()
            .ok_or_else(|| ThzError::unknown_register(format!("block 0x{:04X}", block)))
    }

    pub fn contains_block(&self, block: BlockAddress) -> bool {
        self.blocks
            .read()
            .map(|blocks| blocks.contains_key(&block))
            .unwrap_or(false)
    }

    /// Store the firmware version the way the device reports it
    pub fn set_firmware_version(&self, version: u16) -> ThzResult<()> {
        let [hi, lo] = version.to_be_bytes();
        self.set_block(blocks::FIRMWARE, vec![0x00, 0x00, hi, lo])
    }

    /// Route writes with `(command, write_offset)` to `target`
    pub fn route_write(&self, command: u8, write_offset: u8, target: WriteTarget) -> ThzResult<()> {
        let mut routes = self
            .write_routes
            .write()
            .map_err(|_| ThzError::internal("Failed to lock write routes"))?;
        routes.insert((command, write_offset), target);
        Ok(())
    }

    /// Apply a write telegram
    ///
    /// Unrouted writes land in the block numbered like the command, at the
    /// write offset, when such a block exists. Returns the written block.
    pub fn apply_write(&self, command: u8, write_offset: u8, value: &[u8]) -> ThzResult<BlockAddress> {
        let routed = self
            .write_routes
            .read()
            .map_err(|_| ThzError::internal("Failed to lock write routes"))?
            .get(&(command, write_offset))
            .copied();

        let target = match routed {
            Some(target) => target,
            None if self.contains_block(command as BlockAddress) => WriteTarget {
                block: command as BlockAddress,
                offset: write_offset as usize,
            },
            None => {
                return Err(ThzError::unknown_register(format!(
                    "command 0x{:02X} offset {}",
                    command, write_offset
                )))
            }
        };

        self.write_bytes(target, value)?;
        Ok(target.block)
    }

    /// Encode `value` into the bytes of `register`
    pub fn set_value(&self, register: &RegisterDescriptor, value: &Value) -> ThzResult<()> {
        let bytes = codec::encode(&register.kind, value, register.length, register.byte_order)?;
        self.write_bytes(
            WriteTarget {
                block: register.block,
                offset: register.offset,
            },
            &bytes,
        )
    }

    fn write_bytes(&self, target: WriteTarget, value: &[u8]) -> ThzResult<()> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|_| ThzError::internal("Failed to lock blocks"))?;
        let data = blocks.entry(target.block).or_default();
        let end = target.offset + value.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[target.offset..end].copy_from_slice(value);
        Ok(())
    }

    /// Get block bank statistics
    pub fn get_stats(&self) -> BlockBankStats {
        let (blocks_count, total_bytes) = self
            .blocks
            .read()
            .map(|blocks| (blocks.len(), blocks.values().map(Vec::len).sum()))
            .unwrap_or((0, 0));
        let write_routes_count = self.write_routes.read().map(|routes| routes.len()).unwrap_or(0);
        BlockBankStats {
            blocks_count,
            total_bytes,
            write_routes_count,
        }
    }
}

/// Block bank statistics
#[derive(Debug, Clone)]
pub struct BlockBankStats {
    pub blocks_count: usize,
    pub total_bytes: usize,
    pub write_routes_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodeKind;
    use crate::register_map::RegisterCatalog;

    #[test]
    fn test_block_operations() {
        let bank = BlockBank::new();

        bank.set_block(0x00FB, vec![0x01, 0x02, 0x03]).unwrap();
        assert_eq!(bank.read_block(0x00FB).unwrap(), vec![0x01, 0x02, 0x03]);
        assert!(matches!(
            bank.read_block(0x00AA),
            Err(ThzError::UnknownRegister { .. })
        ));

        bank.set_firmware_version(539).unwrap();
        assert_eq!(bank.read_block(blocks::FIRMWARE).unwrap(), vec![0x00, 0x00, 0x02, 0x1B]);
    }

    #[test]
    fn test_write_routing() {
        let map = RegisterCatalog::builtin().unwrap().select("539").unwrap();
        let bank = BlockBank::for_register_map(&map, 539).unwrap();

        assert_eq!(bank.apply_write(0x05, 2, &[0x00, 0xC8]).unwrap(), blocks::HEAT1);
        assert_eq!(&bank.read_block(blocks::HEAT1).unwrap()[2..4], &[0x00, 0xC8]);

        // Unrouted write falls back to the block named by the command.
        bank.set_block(0x0042, vec![0; 2]).unwrap();
        assert_eq!(bank.apply_write(0x42, 3, &[0xAB]).unwrap(), 0x0042);
        assert_eq!(bank.read_block(0x0042).unwrap(), vec![0, 0, 0, 0xAB]);

        assert!(bank.apply_write(0x99, 0, &[0x01]).is_err());
    }

    #[test]
    fn test_set_value() {
        let bank = BlockBank::new();
        let register = RegisterDescriptor::new("outsideTemp", blocks::GLOBAL, 0, 2, DecodeKind::signed(10.0));

        bank.set_value(&register, &Value::Number(-5.5)).unwrap();
        assert_eq!(bank.read_block(blocks::GLOBAL).unwrap(), vec![0xFF, 0xC9]);

        let stats = bank.get_stats();
        assert_eq!(stats.blocks_count, 1);
        assert_eq!(stats.total_bytes, 2);
    }
}
