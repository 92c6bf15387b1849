//! # wire 模块说明
//!
//! ## 教案目的（Why）
//! - 提供 Protocol Buffers 二进制线格式的最小原语：标签、varint、zigzag、定长数值与长度前缀；
//! - 编码侧基于 `bytes::BytesMut` 追加写入，解码侧在 `&[u8]` 上以 `bytes::Buf` 游标前进，零拷贝借出字符串与子消息。
//!
//! ## 安全契约（What）
//! - 解码侧对每次读取先检查剩余长度，任何越界都返回 [`ProtoError::Truncated`] 而不是 panic；
//! - varint 最长 10 字节，字段号必须位于 `1..=MAX_FIELD_NUMBER`，线类型 6/7 视为非法；
//! - 嵌套深度由 [`ProtoInput::nested`] 统一计数，超过上限即返回 [`ProtoError::DepthExceeded`]。
//!
//! ## 风险提示（Trade-offs）
//! - 子消息先写入独立缓冲再拷贝到父缓冲，省去预先计算长度的第二遍遍历，代价是一次额外拷贝。

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtoError, Result};

/// 允许的最大字段号（2^29 - 1）。
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

const MAX_VARINT_LEN: usize = 10;

/// 线类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl WireType {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = ProtoError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            other => Err(ProtoError::malformed(format!("unknown wire type {other}"))),
        }
    }
}

#[must_use]
pub const fn encode_zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[must_use]
pub const fn decode_zigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[must_use]
pub const fn encode_zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[must_use]
pub const fn decode_zigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// varint 编码后的字节数。
#[must_use]
pub const fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// 线格式写入器。
#[derive(Debug, Default)]
pub struct ProtoOutput {
    buf: BytesMut,
}

impl ProtoOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// 冻结为只读缓冲。
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_tag(&mut self, number: u32, wire_type: WireType) {
        self.write_varint((u64::from(number) << 3) | u64::from(wire_type.as_u8()));
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// 负数按 64 位符号扩展写出（10 字节），与标准实现一致。
    pub fn write_int32(&mut self, value: i32) {
        self.write_varint(i64::from(value) as u64);
    }

    pub fn write_int64(&mut self, value: i64) {
        self.write_varint(value as u64);
    }

    pub fn write_uint32(&mut self, value: u32) {
        self.write_varint(u64::from(value));
    }

    pub fn write_uint64(&mut self, value: u64) {
        self.write_varint(value);
    }

    pub fn write_sint32(&mut self, value: i32) {
        self.write_varint(u64::from(encode_zigzag32(value)));
    }

    pub fn write_sint64(&mut self, value: i64) {
        self.write_varint(encode_zigzag64(value));
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_fixed32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_fixed64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_sfixed32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_sfixed64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_float(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_double(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// 写出长度前缀与负载。
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_varint(value.len() as u64);
        self.buf.put_slice(value);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// 原样追加已编码的片段。
    pub fn write_raw(&mut self, encoded: &[u8]) {
        self.buf.put_slice(encoded);
    }

    /// 在独立缓冲中写出子消息，成功后以长度前缀形式追加。
    ///
    /// 闭包失败时父缓冲保持不变。
    pub fn write_nested<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(&mut ProtoOutput) -> Result<()>,
    {
        let mut nested = ProtoOutput::new();
        write(&mut nested)?;
        self.write_bytes(&nested.buf);
        Ok(())
    }
}

/// 线格式读取器。
#[derive(Clone, Debug)]
pub struct ProtoInput<'a> {
    buf: &'a [u8],
    depth: usize,
    max_depth: usize,
}

impl<'a> ProtoInput<'a> {
    pub fn new(buf: &'a [u8], max_depth: usize) -> Self {
        Self {
            buf,
            depth: 0,
            max_depth,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 为子消息负载创建下一层读取器。
    pub fn nested(&self, payload: &'a [u8]) -> Result<ProtoInput<'a>> {
        let depth = self.depth + 1;
        if depth > self.max_depth {
            return Err(ProtoError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        Ok(ProtoInput {
            buf: payload,
            depth,
            max_depth: self.max_depth,
        })
    }

    /// 读取下一个标签；输入耗尽时返回 `None`。
    pub fn read_tag(&mut self) -> Result<Option<(u32, WireType)>> {
        if self.is_empty() {
            return Ok(None);
        }
        let key = self.read_varint()?;
        let number = key >> 3;
        if number == 0 || number > u64::from(MAX_FIELD_NUMBER) {
            return Err(ProtoError::malformed(format!("invalid field number {number}")));
        }
        let wire_type = WireType::try_from((key & 0x07) as u8)?;
        Ok(Some((number as u32, wire_type)))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for index in 0..MAX_VARINT_LEN {
            if !self.buf.has_remaining() {
                return Err(ProtoError::truncated("varint"));
            }
            let byte = self.buf.get_u8();
            if index == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(ProtoError::malformed("varint overflows 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtoError::malformed("varint longer than 10 bytes"))
    }

    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(self.read_varint()? as i32)
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_varint()? as i64)
    }

    pub fn read_uint32(&mut self) -> Result<u32> {
        Ok(self.read_varint()? as u32)
    }

    pub fn read_uint64(&mut self) -> Result<u64> {
        self.read_varint()
    }

    pub fn read_sint32(&mut self) -> Result<i32> {
        Ok(decode_zigzag32(self.read_varint()? as u32))
    }

    pub fn read_sint64(&mut self) -> Result<i64> {
        Ok(decode_zigzag64(self.read_varint()?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        self.require(4, "fixed32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        self.require(8, "fixed64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_sfixed32(&mut self) -> Result<i32> {
        self.require(4, "sfixed32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_sfixed64(&mut self) -> Result<i64> {
        self.require(8, "sfixed64")?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.require(4, "float")?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.require(8, "double")?;
        Ok(self.buf.get_f64_le())
    }

    /// 读取长度前缀负载，借出原始切片。
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| ProtoError::malformed(format!("length {len} exceeds address space")))?;
        if len > self.buf.remaining() {
            return Err(ProtoError::truncated(format!(
                "length-delimited payload of {len} bytes, {} available",
                self.buf.remaining()
            )));
        }
        let (payload, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(payload)
    }

    /// 读取 UTF-8 字符串，`field` 用于错误信息。
    pub fn read_str(&mut self, field: &str) -> Result<&'a str> {
        let payload = self.read_length_delimited()?;
        std::str::from_utf8(payload).map_err(|_| ProtoError::InvalidUtf8 {
            field: field.to_owned(),
        })
    }

    /// 跳过一个未知字段（含分组）。
    pub fn skip_field(&mut self, number: u32, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                self.require(8, "fixed64")?;
                self.buf.advance(8);
            }
            WireType::LengthDelimited => {
                self.read_length_delimited()?;
            }
            WireType::Fixed32 => {
                self.require(4, "fixed32")?;
                self.buf.advance(4);
            }
            WireType::StartGroup => self.skip_group(number)?,
            WireType::EndGroup => {
                return Err(ProtoError::malformed(format!(
                    "unexpected end group for field {number}"
                )));
            }
        }
        Ok(())
    }

    fn skip_group(&mut self, number: u32) -> Result<()> {
        if self.depth + 1 > self.max_depth {
            return Err(ProtoError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        loop {
            match self.read_tag()? {
                None => return Err(ProtoError::truncated(format!("group {number} not closed"))),
                Some((inner, WireType::EndGroup)) if inner == number => break,
                Some((inner, WireType::EndGroup)) => {
                    return Err(ProtoError::malformed(format!(
                        "end group {inner} does not close group {number}"
                    )));
                }
                Some((inner, wire_type)) => self.skip_field(inner, wire_type)?,
            }
        }
        self.depth -= 1;
        Ok(())
    }

    fn require(&self, len: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(ProtoError::truncated(format!(
                "{what} needs {len} bytes, {} available",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
