//! Stream-related header structures: pack info, folders and substreams.

use crate::{Error, Result};

use super::property_id;
use super::reader::ByteCursor;

/// Upper bound on coders per folder and on streams per coder.
pub const MAX_CODER_STREAMS: u32 = 64;

/// Resource limits for parsing and decoding untrusted archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of files, folders, pack streams or substreams.
    pub max_entries: usize,
    /// Maximum size of the header block, before and after decoding.
    pub max_header_bytes: u64,
    /// Maximum unpacked size of a single folder.
    pub max_folder_unpack: u64,
}

impl Default for ResourceLimits {
    /// | Limit | Default Value |
    /// |-------|---------------|
    /// | `max_entries` | 1,000,000 |
    /// | `max_header_bytes` | 64 MiB |
    /// | `max_folder_unpack` | 4 GiB |
    fn default() -> Self {
        Self {
            max_entries: 1_000_000,
            max_header_bytes: 64 << 20,
            max_folder_unpack: 4 << 30,
        }
    }
}

impl ResourceLimits {
    /// Creates new resource limits with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resource limits with no restrictions.
    pub fn unlimited() -> Self {
        Self {
            max_entries: usize::MAX,
            max_header_bytes: u64::MAX,
            max_folder_unpack: u64::MAX,
        }
    }

    /// Sets the maximum number of entries.
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Sets the maximum header size.
    pub fn max_header_bytes(mut self, max: u64) -> Self {
        self.max_header_bytes = max;
        self
    }

    /// Sets the maximum unpacked size of one folder.
    pub fn max_folder_unpack(mut self, max: u64) -> Self {
        self.max_folder_unpack = max;
        self
    }

    pub(crate) fn check_entries(&self, what: &str, count: u64) -> Result<()> {
        if count > self.max_entries as u64 {
            return Err(Error::ResourceLimitExceeded(format!(
                "too many {}: {} (limit {})",
                what, count, self.max_entries
            )));
        }
        Ok(())
    }
}

/// Skips sections until `tag` appears.
///
/// Reaching `End` first means a required section is missing.
pub(crate) fn wait_for(c: &mut ByteCursor<'_>, tag: u64) -> Result<()> {
    loop {
        let id = c.read_number()?;
        if id == tag {
            return Ok(());
        }
        if id == property_id::END {
            return Err(Error::InvalidArchive(format!(
                "expected property {:#x} before end of section",
                tag
            )));
        }
        c.skip_number_prefixed()?;
    }
}

/// Reads a digest vector: an all-defined/bit-vector mask, then a CRC for each
/// defined item.
pub(crate) fn read_digests(c: &mut ByteCursor<'_>, n: usize) -> Result<Vec<Option<u32>>> {
    let defined = c.read_bool_vector2(n)?;
    defined
        .into_iter()
        .map(|d| if d { c.read_u32_le().map(Some) } else { Ok(None) })
        .collect()
}

/// Information about the packed streams stored in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackInfo {
    /// Offset of the first pack stream, relative to the end of the start header.
    pub pack_pos: u64,
    /// Size of each pack stream.
    pub pack_sizes: Vec<u64>,
    /// CRC of each pack stream, if stored.
    pub pack_crcs: Vec<Option<u32>>,
}

impl PackInfo {
    /// Parses a pack info section (after its tag).
    pub fn parse(c: &mut ByteCursor<'_>, limits: &ResourceLimits) -> Result<Self> {
        let pack_pos = c.read_number()?;
        let count = c.read_number_as_u32()? as usize;
        limits.check_entries("pack streams", count as u64)?;

        wait_for(c, property_id::SIZE)?;
        let mut pack_sizes = Vec::with_capacity(count.min(c.remaining()));
        for _ in 0..count {
            pack_sizes.push(c.read_number()?);
        }

        let mut pack_crcs = None;
        loop {
            match c.read_number()? {
                property_id::END => break,
                property_id::CRC => pack_crcs = Some(read_digests(c, count)?),
                _ => c.skip_number_prefixed()?,
            }
        }

        Ok(Self {
            pack_pos,
            pack_sizes,
            pack_crcs: pack_crcs.unwrap_or_else(|| vec![None; count]),
        })
    }
}

/// One transform stage of a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coder {
    /// Method ID as a big-endian number (see [`super::method_id`]).
    pub method_id: u64,
    /// Number of input streams.
    pub num_in_streams: u32,
    /// Number of output streams.
    pub num_out_streams: u32,
    /// Method properties, empty if none.
    pub properties: Vec<u8>,
}

impl Coder {
    fn parse(c: &mut ByteCursor<'_>) -> Result<Self> {
        let flags = c.read_byte()?;
        let id_size = (flags & 0x0F) as usize;
        let id_bytes = c.read_bytes(id_size)?;
        if id_size > 8 {
            return Err(Error::UnsupportedFolder {
                reason: "method ID longer than 8 bytes",
            });
        }
        let method_id = id_bytes
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));

        let (num_in_streams, num_out_streams) = if flags & 0x10 != 0 {
            let num_in = c.read_number_as_u32()?;
            let num_out = c.read_number_as_u32()?;
            if num_in > MAX_CODER_STREAMS || num_out > MAX_CODER_STREAMS {
                return Err(Error::UnsupportedFolder {
                    reason: "too many streams on one coder",
                });
            }
            (num_in, num_out)
        } else {
            (1, 1)
        };

        let properties = if flags & 0x20 != 0 {
            let size = c.read_number_as_usize()?;
            c.read_bytes(size)?.to_vec()
        } else {
            Vec::new()
        };

        // Alternative method records: parse to stay aligned, then discard.
        let mut chained = flags & 0x80 != 0;
        while chained {
            let alt = c.read_byte()?;
            c.skip(u64::from(alt & 0x0F))?;
            if alt & 0x10 != 0 {
                c.read_number_as_u32()?;
                c.read_number_as_u32()?;
            }
            if alt & 0x20 != 0 {
                c.skip_number_prefixed()?;
            }
            chained = alt & 0x80 != 0;
        }

        Ok(Self {
            method_id,
            num_in_streams,
            num_out_streams,
            properties,
        })
    }
}

/// Connects a coder output stream to another coder's input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindPair {
    /// Folder-wide input stream index.
    pub in_index: u32,
    /// Folder-wide output stream index.
    pub out_index: u32,
}

/// A solid block: a graph of coders producing one unpacked stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Coders in stored order.
    pub coders: Vec<Coder>,
    /// Internal stream connections.
    pub bind_pairs: Vec<BindPair>,
    /// Folder input streams fed from pack streams, in pack-stream order.
    pub pack_streams: Vec<u32>,
    /// Size of every coder output stream.
    pub unpack_sizes: Vec<u64>,
    /// CRC of the folder's unpacked bytes.
    pub unpack_crc: Option<u32>,
    /// Number of files stored in this folder.
    pub num_unpack_substreams: u32,
}

impl Folder {
    /// Parses one folder's coder graph.
    ///
    /// Unpack sizes and CRC are filled in later by [`UnpackInfo::parse`].
    pub fn parse(c: &mut ByteCursor<'_>) -> Result<Self> {
        let num_coders = c.read_number_as_u32()?;
        if num_coders == 0 {
            return Err(Error::InvalidArchive("folder has no coders".into()));
        }
        if num_coders > MAX_CODER_STREAMS {
            return Err(Error::UnsupportedFolder {
                reason: "too many coders in folder",
            });
        }

        let mut coders = Vec::with_capacity(num_coders as usize);
        for _ in 0..num_coders {
            coders.push(Coder::parse(c)?);
        }

        let total_in: u32 = coders.iter().map(|coder| coder.num_in_streams).sum();
        let total_out: u32 = coders.iter().map(|coder| coder.num_out_streams).sum();
        if total_out == 0 {
            return Err(Error::InvalidArchive("folder has no output streams".into()));
        }

        let num_bind_pairs = total_out - 1;
        let mut bind_pairs = Vec::with_capacity(num_bind_pairs as usize);
        for _ in 0..num_bind_pairs {
            let in_index = c.read_number_as_u32()?;
            let out_index = c.read_number_as_u32()?;
            if in_index >= total_in || out_index >= total_out {
                return Err(Error::InvalidArchive(format!(
                    "bind pair {}->{} out of range",
                    out_index, in_index
                )));
            }
            bind_pairs.push(BindPair {
                in_index,
                out_index,
            });
        }

        if total_in < num_bind_pairs {
            return Err(Error::InvalidArchive(
                "folder has more bind pairs than input streams".into(),
            ));
        }

        let mut folder = Self {
            coders,
            bind_pairs,
            pack_streams: Vec::new(),
            unpack_sizes: Vec::new(),
            unpack_crc: None,
            num_unpack_substreams: 1,
        };

        let num_pack_streams = total_in - num_bind_pairs;
        if num_pack_streams == 1 {
            let free = (0..total_in)
                .find(|&i| folder.find_bind_pair_for_in_stream(i).is_none())
                .ok_or_else(|| {
                    Error::InvalidArchive("folder has no unbound input stream".into())
                })?;
            folder.pack_streams.push(free);
        } else {
            for _ in 0..num_pack_streams {
                let index = c.read_number_as_u32()?;
                if index >= total_in {
                    return Err(Error::InvalidArchive(format!(
                        "pack stream index {} out of range",
                        index
                    )));
                }
                folder.pack_streams.push(index);
            }
        }

        Ok(folder)
    }

    /// Total output streams across all coders.
    pub fn total_out_streams(&self) -> usize {
        self.coders.iter().map(|coder| coder.num_out_streams as usize).sum()
    }

    /// Total input streams across all coders.
    pub fn total_in_streams(&self) -> usize {
        self.coders.iter().map(|coder| coder.num_in_streams as usize).sum()
    }

    /// Index of the bind pair feeding input stream `in_index`.
    pub fn find_bind_pair_for_in_stream(&self, in_index: u32) -> Option<usize> {
        self.bind_pairs.iter().position(|bp| bp.in_index == in_index)
    }

    /// Index of the bind pair consuming output stream `out_index`.
    pub fn find_bind_pair_for_out_stream(&self, out_index: u32) -> Option<usize> {
        self.bind_pairs
            .iter()
            .position(|bp| bp.out_index == out_index)
    }

    /// The output stream no bind pair consumes: the folder's final output.
    pub fn main_out_stream(&self) -> Option<usize> {
        (0..self.total_out_streams())
            .rev()
            .find(|&i| self.find_bind_pair_for_out_stream(i as u32).is_none())
    }

    /// Size of the folder's final output.
    pub fn unpack_size(&self) -> Result<u64> {
        self.main_out_stream()
            .and_then(|i| self.unpack_sizes.get(i).copied())
            .ok_or_else(|| Error::InvalidArchive("folder has no final output stream".into()))
    }
}

/// The folders of a streams-info block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackInfo {
    /// Folders in stored order.
    pub folders: Vec<Folder>,
}

impl UnpackInfo {
    /// Parses an unpack info section (after its tag).
    pub fn parse(c: &mut ByteCursor<'_>, limits: &ResourceLimits) -> Result<Self> {
        wait_for(c, property_id::FOLDER)?;
        let count = c.read_number_as_u32()? as usize;
        limits.check_entries("folders", count as u64)?;
        if c.read_byte()? != 0 {
            return Err(Error::UnsupportedFolder {
                reason: "folders stored in additional streams",
            });
        }

        let mut folders = Vec::with_capacity(count.min(c.remaining()));
        for _ in 0..count {
            folders.push(Folder::parse(c)?);
        }

        wait_for(c, property_id::CODERS_UNPACK_SIZE)?;
        for folder in &mut folders {
            let outputs = folder.total_out_streams();
            folder.unpack_sizes = (0..outputs)
                .map(|_| c.read_number())
                .collect::<Result<_>>()?;
        }

        loop {
            match c.read_number()? {
                property_id::END => break,
                property_id::CRC => {
                    let crcs = read_digests(c, folders.len())?;
                    for (folder, crc) in folders.iter_mut().zip(crcs) {
                        folder.unpack_crc = crc;
                    }
                }
                _ => c.skip_number_prefixed()?,
            }
        }

        Ok(Self { folders })
    }
}

/// Per-file sizes and CRCs within folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubStreamsInfo {
    /// Size of each substream, folder by folder.
    pub unpack_sizes: Vec<u64>,
    /// CRC of each substream, if known.
    pub digests: Vec<Option<u32>>,
}

impl SubStreamsInfo {
    /// Substreams implied when the section is absent: one per folder.
    pub fn from_folders(folders: &[Folder]) -> Result<Self> {
        let mut info = Self::default();
        for folder in folders.iter().filter(|f| f.num_unpack_substreams != 0) {
            info.unpack_sizes.push(folder.unpack_size()?);
            info.digests.push(folder.unpack_crc);
        }
        Ok(info)
    }

    /// Parses a substreams info section (after its tag), recording the
    /// substream count on each folder.
    pub fn parse(
        c: &mut ByteCursor<'_>,
        folders: &mut [Folder],
        limits: &ResourceLimits,
    ) -> Result<Self> {
        for folder in folders.iter_mut() {
            folder.num_unpack_substreams = 1;
        }

        let mut id;
        loop {
            id = c.read_number()?;
            match id {
                property_id::NUM_UNPACK_STREAM => {
                    for folder in folders.iter_mut() {
                        folder.num_unpack_substreams = c.read_number_as_u32()?;
                    }
                }
                property_id::CRC | property_id::SIZE | property_id::END => break,
                _ => c.skip_number_prefixed()?,
            }
        }

        let total: u64 = folders
            .iter()
            .map(|f| u64::from(f.num_unpack_substreams))
            .sum();
        limits.check_entries("substreams", total)?;

        // Every substream after the first of its folder has a stored size of
        // at least one byte.
        let implied = folders.iter().filter(|f| f.num_unpack_substreams != 0).count() as u64;
        let stored = if id == property_id::SIZE { c.remaining() as u64 } else { 0 };
        if total - implied > stored {
            return Err(Error::InvalidArchive(format!(
                "{} substreams declared but only {} sizes can follow",
                total, stored
            )));
        }
        let total = total as usize;

        let mut unpack_sizes = Vec::with_capacity(total);
        for (index, folder) in folders.iter().enumerate() {
            let n = folder.num_unpack_substreams;
            if n == 0 {
                continue;
            }
            let mut sum = 0u64;
            if id == property_id::SIZE {
                for _ in 1..n {
                    let size = c.read_number()?;
                    sum = sum.checked_add(size).ok_or_else(|| {
                        Error::InvalidArchive(format!("substream sizes of folder {} overflow", index))
                    })?;
                    unpack_sizes.push(size);
                }
            } else if n > 1 {
                return Err(Error::InvalidArchive(format!(
                    "folder {} has {} substreams but no sizes",
                    index, n
                )));
            }
            let last = folder.unpack_size()?.checked_sub(sum).ok_or_else(|| {
                Error::InvalidArchive(format!(
                    "substream sizes of folder {} exceed its unpack size",
                    index
                ))
            })?;
            unpack_sizes.push(last);
        }
        if id == property_id::SIZE {
            id = c.read_number()?;
        }

        // A lone substream inherits its folder's CRC; those folders have no
        // entry in the digest vector.
        let inherits = |f: &Folder| f.num_unpack_substreams == 1 && f.unpack_crc.is_some();
        let mut digests = Vec::with_capacity(unpack_sizes.len());
        for folder in folders.iter() {
            if inherits(folder) {
                digests.push(folder.unpack_crc);
            } else {
                digests.extend((0..folder.num_unpack_substreams).map(|_| None));
            }
        }
        let num_digests: usize = folders
            .iter()
            .filter(|f| !inherits(f))
            .map(|f| f.num_unpack_substreams as usize)
            .sum();

        loop {
            match id {
                property_id::END => break,
                property_id::CRC => {
                    let stored = read_digests(c, num_digests)?;
                    let mut stored = stored.into_iter();
                    let mut si = 0;
                    for folder in folders.iter() {
                        let n = folder.num_unpack_substreams as usize;
                        if inherits(folder) {
                            si += 1;
                            continue;
                        }
                        for slot in &mut digests[si..si + n] {
                            *slot = stored.next().flatten();
                        }
                        si += n;
                    }
                }
                _ => c.skip_number_prefixed()?,
            }
            id = c.read_number()?;
        }

        Ok(Self {
            unpack_sizes,
            digests,
        })
    }
}

/// A complete streams-info block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamsInfo {
    /// Pack streams.
    pub pack_info: PackInfo,
    /// Folders.
    pub folders: Vec<Folder>,
    /// Per-file sizes and CRCs.
    pub substreams: SubStreamsInfo,
}

impl StreamsInfo {
    /// Parses a streams-info block (after its tag) up to its `End`.
    pub fn parse(c: &mut ByteCursor<'_>, limits: &ResourceLimits) -> Result<Self> {
        let mut pack_info = PackInfo::default();
        let mut folders = Vec::new();
        let mut substreams = None;

        loop {
            match c.read_number()? {
                property_id::END => break,
                property_id::PACK_INFO => pack_info = PackInfo::parse(c, limits)?,
                property_id::UNPACK_INFO => folders = UnpackInfo::parse(c, limits)?.folders,
                property_id::SUBSTREAMS_INFO => {
                    substreams = Some(SubStreamsInfo::parse(c, &mut folders, limits)?)
                }
                other => {
                    return Err(Error::InvalidArchive(format!(
                        "unexpected property {:#x} in streams info",
                        other
                    )));
                }
            }
        }

        let substreams = match substreams {
            Some(s) => s,
            None => SubStreamsInfo::from_folders(&folders)?,
        };

        Ok(Self {
            pack_info,
            folders,
            substreams,
        })
    }
}
