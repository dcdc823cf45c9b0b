use std::io::{Cursor, Read};

use crate::error::{ExportError, Result};
use crate::source::AssetSource;

pub const MAP_DBC: &str = "DBFilesClient\\Map.dbc";

pub struct DbcFile {
    record_count: u32,
    field_count: u32,
    record_size: u32,
    data: Vec<u8>,
    string_table: Vec<u8>,
}

pub struct DbcRecord<'a> {
    file: &'a DbcFile,
    index: usize,
}

impl DbcFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes).map_err(|err| ExportError::decode("DBC", err))
    }

    /// Read, parse and validate a client table from the archives
    pub fn open<S: AssetSource + ?Sized>(source: &mut S, name: &str) -> Result<Self> {
        let bytes = source.read_by_name(name)?;
        let dbc = Self::parse(&bytes).map_err(|err| ExportError::decode(name, err))?;
        dbc.validate().map_err(|err| ExportError::decode(name, err))?;
        Ok(dbc)
    }

    fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(|e| e.to_string())?;
        if &magic != b"WDBC" {
            return Err("invalid DBC magic".to_string());
        }

        let record_count = read_u32(&mut cursor)?;
        let field_count = read_u32(&mut cursor)?;
        let record_size = read_u32(&mut cursor)?;
        let string_size = read_u32(&mut cursor)?;

        let data_size = record_count
            .checked_mul(record_size)
            .ok_or_else(|| "DBC data size overflow".to_string())? as usize;
        let mut data = vec![0u8; data_size];
        cursor.read_exact(&mut data).map_err(|e| e.to_string())?;

        let mut string_table = vec![0u8; string_size as usize];
        cursor.read_exact(&mut string_table).map_err(|e| e.to_string())?;

        Ok(Self {
            record_count,
            field_count,
            record_size,
            data,
            string_table,
        })
    }

    pub fn record_count(&self) -> usize {
        self.record_count as usize
    }

    pub fn field_count(&self) -> usize {
        self.field_count as usize
    }

    pub fn record(&self, index: usize) -> Option<DbcRecord<'_>> {
        if index >= self.record_count() {
            return None;
        }
        Some(DbcRecord { file: self, index })
    }

    pub fn records(&self) -> impl Iterator<Item = DbcRecord<'_>> {
        (0..self.record_count()).filter_map(|idx| self.record(idx))
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.field_count * 4 != self.record_size {
            return Err("DBC header mismatch: field_count * 4 != record_size".to_string());
        }
        Ok(())
    }
}

impl DbcRecord<'_> {
    fn field_bytes(&self, field: usize) -> Option<[u8; 4]> {
        let offset = field.checked_mul(4)?;
        if offset >= self.file.record_size as usize {
            return None;
        }
        let start = self.index * self.file.record_size as usize + offset;
        self.file.data.get(start..start + 4)?.try_into().ok()
    }

    pub fn get_u32(&self, field: usize) -> Option<u32> {
        self.field_bytes(field).map(u32::from_le_bytes)
    }

    pub fn get_f32(&self, field: usize) -> Option<f32> {
        self.field_bytes(field).map(f32::from_le_bytes)
    }

    pub fn get_string(&self, field: usize) -> Option<String> {
        let offset = self.get_u32(field)? as usize;
        if offset >= self.file.string_table.len() {
            return Some(String::new());
        }
        let slice = &self.file.string_table[offset..];
        let len = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        Some(String::from_utf8_lossy(&slice[..len]).to_string())
    }
}

fn read_u32<R: Read>(reader: &mut R) -> std::result::Result<u32, String> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(|e| e.to_string())?;
    Ok(u32::from_le_bytes(buf))
}

/// One row of Map.dbc
#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    pub id: u32,
    /// Directory name under world\maps, original case
    pub directory: String,
    /// Localized display name (first locale column)
    pub name: String,
}

pub fn read_map_dbc<S: AssetSource + ?Sized>(source: &mut S) -> Result<Vec<MapEntry>> {
    tracing::info!("Read Map.dbc file...");
    let dbc = DbcFile::open(source, MAP_DBC)?;

    let mut entries = Vec::with_capacity(dbc.record_count());
    for record in dbc.records() {
        let id = record.get_u32(0).unwrap_or(0);
        let directory = record.get_string(1).unwrap_or_default();
        if directory.is_empty() {
            continue;
        }
        let name = record
            .get_string(4)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| directory.clone());
        entries.push(MapEntry { id, directory, name });
    }

    tracing::info!("Done! ({} maps loaded)", entries.len());
    Ok(entries)
}

/// Builds WDBC files for tests
#[cfg(test)]
pub(crate) mod fixture {
    use byteorder::{LittleEndian, WriteBytesExt};

    pub enum Field {
        U32(u32),
        F32(f32),
        Str(&'static str),
    }

    pub fn build(records: &[Vec<Field>]) -> Vec<u8> {
        let field_count = records.first().map_or(0, |r| r.len()) as u32;
        let mut strings = vec![0u8];
        let mut data = Vec::new();
        for record in records {
            for field in record {
                match field {
                    Field::U32(v) => data.write_u32::<LittleEndian>(*v).unwrap(),
                    Field::F32(v) => data.write_f32::<LittleEndian>(*v).unwrap(),
                    Field::Str(s) => {
                        data.write_u32::<LittleEndian>(strings.len() as u32).unwrap();
                        strings.extend_from_slice(s.as_bytes());
                        strings.push(0);
                    }
                }
            }
        }

        let mut out = b"WDBC".to_vec();
        out.write_u32::<LittleEndian>(records.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(field_count).unwrap();
        out.write_u32::<LittleEndian>(field_count * 4).unwrap();
        out.write_u32::<LittleEndian>(strings.len() as u32).unwrap();
        out.extend_from_slice(&data);
        out.extend_from_slice(&strings);
        out
    }
}
