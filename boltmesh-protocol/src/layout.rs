//! Fixed-header layouts for Bolt v1 frames.
//!
//! Request (22 bytes header):
//!
//! ```text
//! +-------+--------+--------+---------+------------+-------+
//! | proto | type   | code   | version | request id | codec |
//! | 1     | 1      | 2      | 1       | 4          | 1     |
//! +-------+--------+--------+---------+------------+-------+
//! | timeout | class len | header len | content len         |
//! | 4       | 2         | 2          | 4                   |
//! +---------+-----------+------------+---------------------+
//! | class | header | content                               |
//! +-------+--------+---------------------------------------+
//! ```
//!
//! Response (20 bytes header) is identical except that a 2-byte
//! response status replaces the 4-byte timeout.

use crate::cmd_type;
use crate::field::FrameField;
use crate::{REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN};
use bytes::{Buf, BufMut};

/// Position of one fixed field inside a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub field: FrameField,
    pub offset: usize,
    pub width: usize,
}

const fn slot(field: FrameField, offset: usize, width: usize) -> FieldSlot {
    FieldSlot {
        field,
        offset,
        width,
    }
}

/// Ordered fixed-field descriptor for one frame variant.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub name: &'static str,
    pub header_len: usize,
    /// Fields in wire order.
    pub slots: &'static [FieldSlot],
}

/// Request frame layout.
pub const REQUEST_LAYOUT: FrameLayout = FrameLayout {
    name: "request",
    header_len: REQUEST_HEADER_LEN,
    slots: &[
        slot(FrameField::Protocol, 0, 1),
        slot(FrameField::CmdType, 1, 1),
        slot(FrameField::CmdCode, 2, 2),
        slot(FrameField::Version, 4, 1),
        slot(FrameField::RequestId, 5, 4),
        slot(FrameField::Codec, 9, 1),
        slot(FrameField::Timeout, 10, 4),
        slot(FrameField::ClassLength, 14, 2),
        slot(FrameField::HeaderLength, 16, 2),
        slot(FrameField::ContentLength, 18, 4),
    ],
};

/// Response frame layout.
pub const RESPONSE_LAYOUT: FrameLayout = FrameLayout {
    name: "response",
    header_len: RESPONSE_HEADER_LEN,
    slots: &[
        slot(FrameField::Protocol, 0, 1),
        slot(FrameField::CmdType, 1, 1),
        slot(FrameField::CmdCode, 2, 2),
        slot(FrameField::Version, 4, 1),
        slot(FrameField::RequestId, 5, 4),
        slot(FrameField::Codec, 9, 1),
        slot(FrameField::ResponseStatus, 10, 2),
        slot(FrameField::ClassLength, 12, 2),
        slot(FrameField::HeaderLength, 14, 2),
        slot(FrameField::ContentLength, 16, 4),
    ],
};

/// Whether every slot is as wide as its field's registered native type.
const fn widths_match_registry(layout: &FrameLayout) -> bool {
    let mut i = 0;
    while i < layout.slots.len() {
        let slot = &layout.slots[i];
        if slot.width != slot.field.kind().width() {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(
    widths_match_registry(&REQUEST_LAYOUT) && widths_match_registry(&RESPONSE_LAYOUT),
    "frame layout width disagrees with the field registry"
);

impl FrameLayout {
    /// Selects the layout from the discriminant byte (wire byte 1).
    ///
    /// `REQUEST` and `REQUEST_ONEWAY` are requests; every other value,
    /// known or not, takes the response branch.
    pub fn for_cmd_type(value: u8) -> &'static FrameLayout {
        match value {
            cmd_type::REQUEST | cmd_type::REQUEST_ONEWAY => &REQUEST_LAYOUT,
            _ => &RESPONSE_LAYOUT,
        }
    }

    pub fn is_request(&self) -> bool {
        self.header_len == REQUEST_HEADER_LEN
    }

    /// Returns the slot of `field`, if this variant carries it.
    pub fn slot(&self, field: FrameField) -> Option<&FieldSlot> {
        self.slots.iter().find(|s| s.field == field)
    }

    /// Reads `field` as an unsigned big-endian integer.
    ///
    /// Returns `None` if the variant has no such field or `header` is
    /// shorter than the slot.
    pub fn read(&self, header: &[u8], field: FrameField) -> Option<u64> {
        let slot = self.slot(field)?;
        let mut bytes = header.get(slot.offset..slot.offset + slot.width)?;
        Some(bytes.get_uint(slot.width))
    }

    /// Writes every fixed field in wire order, taking each value's bit
    /// pattern from `value_of` truncated to the slot width.
    pub fn write<B, F>(&self, buf: &mut B, mut value_of: F)
    where
        B: BufMut,
        F: FnMut(FrameField) -> u64,
    {
        for slot in self.slots {
            let mask = if slot.width >= 8 {
                u64::MAX
            } else {
                (1u64 << (slot.width * 8)) - 1
            };
            buf.put_uint(value_of(slot.field) & mask, slot.width);
        }
    }
}
