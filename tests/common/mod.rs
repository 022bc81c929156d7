//! Shared test utilities for integration tests.
//!
//! The archives used by the tests are assembled byte by byte here, so every
//! folder shape the decoder supports (and a few it rejects) can be produced
//! without an external archiver.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::Write;

use sevenz_decode::codec::filters::{X86Filter, arm_thumb_convert};
use sevenz_decode::format::method_id;
use sevenz_decode::format::reader::write_number;
use sevenz_decode::format::{SIGNATURE, property_id};

/// `"hello"`'s CRC-32.
pub const HELLO_CRC: u32 = 0x3610_A686;

/// One coder record as stored in the header.
#[derive(Debug, Clone)]
pub struct CoderSpec {
    pub method_id: u64,
    pub num_in: u64,
    pub num_out: u64,
    pub properties: Vec<u8>,
}

impl CoderSpec {
    pub fn simple(method_id: u64) -> Self {
        Self {
            method_id,
            num_in: 1,
            num_out: 1,
            properties: Vec::new(),
        }
    }

    fn id_bytes(&self) -> Vec<u8> {
        if self.method_id == 0 {
            return vec![0];
        }
        let bytes = self.method_id.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        bytes[skip..].to_vec()
    }

    fn write(&self, out: &mut Vec<u8>) {
        let id = self.id_bytes();
        let complex = self.num_in != 1 || self.num_out != 1;
        let mut flags = id.len() as u8;
        if complex {
            flags |= 0x10;
        }
        if !self.properties.is_empty() {
            flags |= 0x20;
        }
        out.push(flags);
        out.extend_from_slice(&id);
        if complex {
            write_number(out, self.num_in);
            write_number(out, self.num_out);
        }
        if !self.properties.is_empty() {
            write_number(out, self.properties.len() as u64);
            out.extend_from_slice(&self.properties);
        }
    }
}

/// How the main data of a folder is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainCoder {
    Copy,
    Lzma,
}

/// Flags fed to the BCJ2 range decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bcj2Flags {
    /// Every candidate opcode is left alone (all-zero range stream).
    Never,
    /// Every candidate opcode is converted (all-0xFF range stream).
    Always,
}

/// A folder and the files stored in it.
#[derive(Debug, Clone)]
pub struct FolderSpec {
    pub coders: Vec<CoderSpec>,
    /// `(in_index, out_index)` pairs.
    pub bind_pairs: Vec<(u64, u64)>,
    /// Written only when the folder has more than one pack stream.
    pub pack_stream_indices: Vec<u64>,
    pub unpack_sizes: Vec<u64>,
    pub crc: Option<u32>,
    /// Pack streams in stored order.
    pub packed: Vec<Vec<u8>>,
    pub files: Vec<(String, Vec<u8>)>,
    /// CRC written for each file; defaults to the real CRC.
    pub file_crcs: Vec<Option<u32>>,
}

fn concat(files: &[(&str, &[u8])]) -> Vec<u8> {
    files.iter().flat_map(|(_, d)| d.iter().copied()).collect()
}

fn owned(files: &[(&str, &[u8])]) -> Vec<(String, Vec<u8>)> {
    files
        .iter()
        .map(|(n, d)| (n.to_string(), d.to_vec()))
        .collect()
}

/// Compresses `data` as a raw LZMA stream, returning `(properties, packed)`.
pub fn lzma_compress(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let opts = lzma_rust2::LzmaOptions::with_preset(6);
    let mut props = vec![opts.get_props()];
    props.extend_from_slice(&opts.dict_size.to_le_bytes());

    let mut packed = Vec::new();
    {
        let mut writer = lzma_rust2::LzmaWriter::new_no_header(&mut packed, &opts, true)
            .expect("create LZMA writer");
        writer.write_all(data).expect("compress");
        writer.finish().expect("finish LZMA stream");
    }
    (props, packed)
}

fn main_coder(kind: MainCoder, data: &[u8]) -> (CoderSpec, Vec<u8>) {
    match kind {
        MainCoder::Copy => (CoderSpec::simple(method_id::COPY), data.to_vec()),
        MainCoder::Lzma => {
            let (properties, packed) = lzma_compress(data);
            let mut coder = CoderSpec::simple(method_id::LZMA);
            coder.properties = properties;
            (coder, packed)
        }
    }
}

fn is_bcj2_candidate(prev: u8, b: u8) -> bool {
    b & 0xFE == 0xE8 || (prev == 0x0F && b & 0xF0 == 0x80)
}

/// Splits `data` into BCJ2 main/call/jump/range streams.
pub fn bcj2_split(data: &[u8], flags: Bcj2Flags) -> [Vec<u8>; 4] {
    let mut main = Vec::with_capacity(data.len());
    let mut call = Vec::new();
    let mut jump = Vec::new();
    let mut bits = 0usize;
    let mut prev = 0u8;
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        main.push(b);
        i += 1;
        if !is_bcj2_candidate(prev, b) {
            prev = b;
            continue;
        }
        if i == data.len() {
            break;
        }
        bits += 1;
        if flags == Bcj2Flags::Never {
            prev = b;
            continue;
        }
        let k = (data.len() - i).min(4);
        let mut operand = [0u8; 4];
        operand[..k].copy_from_slice(&data[i..i + k]);
        let dest = u32::from_le_bytes(operand).wrapping_add(i as u32 + 4);
        if b == 0xE8 {
            call.extend_from_slice(&dest.to_be_bytes());
        } else {
            jump.extend_from_slice(&dest.to_be_bytes());
        }
        i += k;
        prev = operand[3];
    }

    let fill = match flags {
        Bcj2Flags::Never => 0x00,
        Bcj2Flags::Always => 0xFF,
    };
    let range = vec![fill; 16 + bits];
    [main, call, jump, range]
}

impl FolderSpec {
    fn new(files: &[(&str, &[u8])]) -> Self {
        let data = concat(files);
        Self {
            coders: Vec::new(),
            bind_pairs: Vec::new(),
            pack_stream_indices: Vec::new(),
            unpack_sizes: vec![data.len() as u64],
            crc: None,
            packed: Vec::new(),
            files: owned(files),
            file_crcs: files
                .iter()
                .map(|(_, d)| Some(crc32fast::hash(d)))
                .collect(),
        }
    }

    /// One Copy or LZMA coder.
    pub fn single(kind: MainCoder, files: &[(&str, &[u8])]) -> Self {
        let data = concat(files);
        let (coder, packed) = main_coder(kind, &data);
        let mut folder = Self::new(files);
        folder.coders = vec![coder];
        folder.packed = vec![packed];
        folder
    }

    /// Stored files.
    pub fn copy(files: &[(&str, &[u8])]) -> Self {
        Self::single(MainCoder::Copy, files)
    }

    /// LZMA-compressed files.
    pub fn lzma(files: &[(&str, &[u8])]) -> Self {
        Self::single(MainCoder::Lzma, files)
    }

    /// A main coder followed by a single-stream branch filter.
    pub fn filtered(kind: MainCoder, filter: u64, files: &[(&str, &[u8])]) -> Self {
        let data = concat(files);
        let mut filtered = data.clone();
        match filter {
            method_id::BCJ_X86 => {
                X86Filter::new().encode(&mut filtered);
            }
            method_id::ARMT => {
                arm_thumb_convert(&mut filtered, 0, true);
            }
            other => panic!("not a branch filter: {:#x}", other),
        }
        let (coder, packed) = main_coder(kind, &filtered);
        let size = data.len() as u64;
        let mut folder = Self::new(files);
        folder.coders = vec![coder, CoderSpec::simple(filter)];
        folder.bind_pairs = vec![(1, 0)];
        folder.unpack_sizes = vec![size, size];
        folder.packed = vec![packed];
        folder
    }

    /// Three Copy/LZMA coders feeding BCJ2, in the layout 7-Zip writes.
    pub fn bcj2(kind: MainCoder, flags: Bcj2Flags, files: &[(&str, &[u8])]) -> Self {
        let data = concat(files);
        let [main, call, jump, range] = bcj2_split(&data, flags);

        let (jump_coder, jump_packed) = main_coder(kind, &jump);
        let (call_coder, call_packed) = main_coder(kind, &call);
        let (main_coder_spec, main_packed) = main_coder(kind, &main);
        let bcj2 = CoderSpec {
            method_id: method_id::BCJ2,
            num_in: 4,
            num_out: 1,
            properties: Vec::new(),
        };

        let mut folder = Self::new(files);
        folder.coders = vec![jump_coder, call_coder, main_coder_spec, bcj2];
        folder.bind_pairs = vec![(5, 0), (4, 1), (3, 2)];
        folder.pack_stream_indices = vec![2, 6, 1, 0];
        folder.unpack_sizes = vec![
            jump.len() as u64,
            call.len() as u64,
            main.len() as u64,
            data.len() as u64,
        ];
        folder.packed = vec![main_packed, range, call_packed, jump_packed];
        folder
    }

    /// Stores the CRC of the whole unpacked folder.
    pub fn with_folder_crc(mut self) -> Self {
        let data: Vec<u8> = self.files.iter().flat_map(|(_, d)| d.clone()).collect();
        self.crc = Some(crc32fast::hash(&data));
        self
    }

    fn write_coders(&self, out: &mut Vec<u8>) {
        write_number(out, self.coders.len() as u64);
        for coder in &self.coders {
            coder.write(out);
        }
        for &(in_index, out_index) in &self.bind_pairs {
            write_number(out, in_index);
            write_number(out, out_index);
        }
        if self.pack_stream_indices.len() > 1 {
            for &index in &self.pack_stream_indices {
                write_number(out, index);
            }
        }
    }
}

/// An entry in archive order.
#[derive(Debug, Clone)]
enum EntrySpec {
    /// Next file of the next folder with data.
    Stream,
    EmptyFile(String),
    Directory(String),
}

/// Packs a bit vector most significant bit first.
pub fn write_bits(out: &mut Vec<u8>, bits: &[bool]) {
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit {
                byte |= 0x80 >> i;
            }
        }
        out.push(byte);
    }
}

fn write_digests(out: &mut Vec<u8>, digests: &[Option<u32>]) {
    if digests.iter().all(Option::is_some) {
        out.push(1);
    } else {
        out.push(0);
        let defined: Vec<bool> = digests.iter().map(Option::is_some).collect();
        write_bits(out, &defined);
    }
    for crc in digests.iter().flatten() {
        out.extend_from_slice(&crc.to_le_bytes());
    }
}

fn write_property(out: &mut Vec<u8>, id: u64, payload: &[u8]) {
    write_number(out, id);
    write_number(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

/// Writes a streams-info block (after its tag) for `folders`, whose pack
/// streams start at `pack_pos`.
fn write_streams_info(out: &mut Vec<u8>, folders: &[FolderSpec], pack_pos: u64, substreams: bool) {
    let pack_sizes: Vec<u64> = folders
        .iter()
        .flat_map(|f| f.packed.iter().map(|p| p.len() as u64))
        .collect();

    write_number(out, property_id::PACK_INFO);
    write_number(out, pack_pos);
    write_number(out, pack_sizes.len() as u64);
    write_number(out, property_id::SIZE);
    for &size in &pack_sizes {
        write_number(out, size);
    }
    write_number(out, property_id::END);

    write_number(out, property_id::UNPACK_INFO);
    write_number(out, property_id::FOLDER);
    write_number(out, folders.len() as u64);
    out.push(0);
    for folder in folders {
        folder.write_coders(out);
    }
    write_number(out, property_id::CODERS_UNPACK_SIZE);
    for folder in folders {
        for &size in &folder.unpack_sizes {
            write_number(out, size);
        }
    }
    if folders.iter().any(|f| f.crc.is_some()) {
        write_number(out, property_id::CRC);
        let crcs: Vec<Option<u32>> = folders.iter().map(|f| f.crc).collect();
        write_digests(out, &crcs);
    }
    write_number(out, property_id::END);

    if substreams {
        write_number(out, property_id::SUBSTREAMS_INFO);
        write_number(out, property_id::NUM_UNPACK_STREAM);
        for folder in folders {
            write_number(out, folder.files.len() as u64);
        }
        if folders.iter().any(|f| f.files.len() > 1) {
            write_number(out, property_id::SIZE);
            for folder in folders {
                let n = folder.files.len();
                for (_, data) in folder.files.iter().take(n.saturating_sub(1)) {
                    write_number(out, data.len() as u64);
                }
            }
        }
        let digests: Vec<Option<u32>> = folders
            .iter()
            .filter(|f| !(f.files.len() == 1 && f.crc.is_some()))
            .flat_map(|f| f.file_crcs.iter().copied())
            .collect();
        if !digests.is_empty() {
            write_number(out, property_id::CRC);
            write_digests(out, &digests);
        }
        write_number(out, property_id::END);
    }

    write_number(out, property_id::END);
}

fn name_payload(names: &[&str]) -> Vec<u8> {
    let mut payload = vec![0u8];
    for name in names {
        for unit in name.encode_utf16().chain(std::iter::once(0)) {
            payload.extend_from_slice(&unit.to_le_bytes());
        }
    }
    payload
}

/// How the header block is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCoding {
    Plain,
    Encoded(MainCoder),
}

/// Builds complete archives in memory.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    folders: Vec<FolderSpec>,
    entries: Vec<EntrySpec>,
    header: HeaderCoding,
    mtime: Option<u64>,
    attributes: Option<u32>,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
            entries: Vec::new(),
            header: HeaderCoding::Plain,
            mtime: None,
            attributes: None,
        }
    }

    pub fn folder(mut self, folder: FolderSpec) -> Self {
        self.entries
            .extend(folder.files.iter().map(|_| EntrySpec::Stream));
        self.folders.push(folder);
        self
    }

    pub fn empty_file(mut self, name: &str) -> Self {
        self.entries.push(EntrySpec::EmptyFile(name.to_string()));
        self
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.entries.push(EntrySpec::Directory(name.to_string()));
        self
    }

    pub fn header(mut self, coding: HeaderCoding) -> Self {
        self.header = coding;
        self
    }

    /// Gives every entry the same last-write FILETIME.
    pub fn mtime(mut self, filetime: u64) -> Self {
        self.mtime = Some(filetime);
        self
    }

    /// Gives every entry the same attribute word.
    pub fn attributes(mut self, attributes: u32) -> Self {
        self.attributes = Some(attributes);
        self
    }

    fn plain_header(&self) -> Vec<u8> {
        let mut h = Vec::new();
        write_number(&mut h, property_id::HEADER);
        if !self.folders.is_empty() {
            write_number(&mut h, property_id::MAIN_STREAMS_INFO);
            write_streams_info(&mut h, &self.folders, 0, true);
        }

        if !self.entries.is_empty() {
            let mut stream_names = self
                .folders
                .iter()
                .flat_map(|f| f.files.iter().map(|(n, _)| n.as_str()));
            let names: Vec<&str> = self
                .entries
                .iter()
                .map(|e| match e {
                    EntrySpec::Stream => stream_names.next().unwrap_or(""),
                    EntrySpec::EmptyFile(n) | EntrySpec::Directory(n) => n.as_str(),
                })
                .collect();

            write_number(&mut h, property_id::FILES_INFO);
            write_number(&mut h, self.entries.len() as u64);

            let empty: Vec<bool> = self
                .entries
                .iter()
                .map(|e| !matches!(e, EntrySpec::Stream))
                .collect();
            if empty.iter().any(|&b| b) {
                let mut payload = Vec::new();
                write_bits(&mut payload, &empty);
                write_property(&mut h, property_id::EMPTY_STREAM, &payload);

                let empty_file: Vec<bool> = self
                    .entries
                    .iter()
                    .filter(|e| !matches!(e, EntrySpec::Stream))
                    .map(|e| matches!(e, EntrySpec::EmptyFile(_)))
                    .collect();
                if empty_file.iter().any(|&b| b) {
                    let mut payload = Vec::new();
                    write_bits(&mut payload, &empty_file);
                    write_property(&mut h, property_id::EMPTY_FILE, &payload);
                }
            }

            write_property(&mut h, property_id::NAME, &name_payload(&names));

            if let Some(filetime) = self.mtime {
                let mut payload = vec![1, 0];
                for _ in &self.entries {
                    payload.extend_from_slice(&filetime.to_le_bytes());
                }
                write_property(&mut h, property_id::MTIME, &payload);
            }
            if let Some(attributes) = self.attributes {
                let mut payload = vec![1, 0];
                for _ in &self.entries {
                    payload.extend_from_slice(&attributes.to_le_bytes());
                }
                write_property(&mut h, property_id::WIN_ATTRIBUTES, &payload);
            }
            write_number(&mut h, property_id::END);
        }

        write_number(&mut h, property_id::END);
        h
    }

    /// Returns the archive bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut packed: Vec<u8> = self
            .folders
            .iter()
            .flat_map(|f| f.packed.iter().flatten().copied())
            .collect();

        let plain = self.plain_header();
        let header = match self.header {
            HeaderCoding::Plain => plain,
            HeaderCoding::Encoded(kind) => {
                let folder = FolderSpec::single(kind, &[("", plain.as_slice())]).with_folder_crc();
                let pack_pos = packed.len() as u64;
                packed.extend(folder.packed.iter().flatten().copied());
                let mut h = Vec::new();
                write_number(&mut h, property_id::ENCODED_HEADER);
                write_streams_info(&mut h, std::slice::from_ref(&folder), pack_pos, false);
                h
            }
        };

        let mut out = start_header(packed.len() as u64, header.len() as u64, crc32fast::hash(&header))
            .to_vec();
        out.extend_from_slice(&packed);
        out.extend_from_slice(&header);
        out
    }
}

/// Builds the 32-byte signature header.
pub fn start_header(offset: u64, size: u64, crc: u32) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..6].copy_from_slice(SIGNATURE);
    bytes[7] = 4;
    bytes[12..20].copy_from_slice(&offset.to_le_bytes());
    bytes[20..28].copy_from_slice(&size.to_le_bytes());
    bytes[28..32].copy_from_slice(&crc.to_le_bytes());
    let start_crc = crc32fast::hash(&bytes[12..32]);
    bytes[8..12].copy_from_slice(&start_crc.to_le_bytes());
    bytes
}

/// Rewrites the start header after the header block was edited in place.
pub fn reseal(archive: &mut [u8]) {
    let offset = u64::from_le_bytes(archive[12..20].try_into().unwrap());
    let size = u64::from_le_bytes(archive[20..28].try_into().unwrap());
    let start = 32 + offset as usize;
    let crc = crc32fast::hash(&archive[start..start + size as usize]);
    let header = start_header(offset, size, crc);
    archive[..32].copy_from_slice(&header);
}

/// The single-file "hello" archive.
pub fn hello_archive() -> Vec<u8> {
    ArchiveBuilder::new()
        .folder(FolderSpec::copy(&[("a.txt", b"hello")]))
        .build()
}

/// x86-looking bytes with plenty of CALL/JMP/Jcc opcodes.
pub fn x86_like(len: usize, seed: u64) -> Vec<u8> {
    use rand::{Rng, SeedableRng};

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        match rng.gen_range(0..6) {
            0 => {
                data.push(0xE8);
                data.extend_from_slice(&rng.gen_range(-4096i32..4096).to_le_bytes());
            }
            1 => {
                data.push(0xE9);
                data.extend_from_slice(&rng.gen_range(-4096i32..4096).to_le_bytes());
            }
            2 => {
                data.push(0x0F);
                data.push(0x84);
                data.extend_from_slice(&rng.gen_range(-512i32..512).to_le_bytes());
            }
            _ => data.push(rng.r#gen::<u8>() & 0x7F),
        }
    }
    data.truncate(len);
    data
}

/// Extracts the error from a Result, panicking if it's Ok.
pub fn expect_err<T, E>(result: Result<T, E>) -> E {
    match result {
        Ok(_) => panic!("Expected error but got Ok"),
        Err(e) => e,
    }
}
