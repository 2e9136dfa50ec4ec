//! Built-in IRCC codes for devices that publish no command list.
//!
//! The IRCC descriptor advertises its infrared categories as base64 of six
//! bytes: `00 <ir type> <4 category bytes>`. A button code is base64 of
//! `00 00 00 <ir type> <4 category bytes> 00 00 00 <command> 03`.
//!
//! The table below only knows the Blu-ray player category seen in the
//! field; new categories are added as entries of [`BUILTIN_CATEGORIES`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::registry::CommandRecord;

pub struct IrCategory {
    pub ir_type: u8,
    pub category: [u8; 4],
    pub buttons: &'static [(&'static str, u8)],
}

const BDP_BUTTONS: &[(&str, u8)] = &[
    ("Confirm", 0x3D),
    ("Up", 0x39),
    ("Down", 0x3A),
    ("Right", 0x3C),
    ("Left", 0x3B),
    ("Home", 0x42),
    ("Options", 0x3F),
    ("Return", 0x43),
    ("Num1", 0x00),
    ("Num2", 0x01),
    ("Num3", 0x02),
    ("Num4", 0x03),
    ("Num5", 0x04),
    ("Num6", 0x05),
    ("Num7", 0x06),
    ("Num8", 0x07),
    ("Num9", 0x08),
    ("Num0", 0x09),
    ("Power", 0x15),
    ("Display", 0x41),
    ("Audio", 0x64),
    ("SubTitle", 0x63),
    ("Favorites", 0x5E),
    ("Yellow", 0x69),
    ("Blue", 0x66),
    ("Red", 0x67),
    ("Green", 0x68),
    ("Play", 0x1A),
    ("Stop", 0x18),
    ("Pause", 0x19),
    ("Rewind", 0x1B),
    ("Forward", 0x1C),
    ("Prev", 0x57),
    ("Next", 0x56),
    ("Replay", 0x76),
    ("Advance", 0x75),
    ("Angle", 0x65),
    ("TopMenu", 0x2C),
    ("PopUpMenu", 0x29),
    ("Eject", 0x16),
    ("Karaoke", 0x4A),
    ("Netflix", 0x4B),
    ("Mode3D", 0x4D),
];

pub const BUILTIN_CATEGORIES: &[IrCategory] = &[IrCategory {
    ir_type: 0x03,
    category: [0x00, 0x00, 0x1C, 0x5A],
    buttons: BDP_BUTTONS,
}];

/// Decodes an advertised category identifier into `(ir type, category)`.
pub fn decode_category(encoded: &str) -> Option<(u8, [u8; 4])> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    if bytes.len() != 6 {
        return None;
    }
    Some((bytes[1], [bytes[2], bytes[3], bytes[4], bytes[5]]))
}

pub fn encode_command(ir_type: u8, category: [u8; 4], command: u8) -> String {
    let [c0, c1, c2, c3] = category;
    STANDARD.encode([0, 0, 0, ir_type, c0, c1, c2, c3, 0, 0, 0, command, 0x03])
}

/// Commands of every known category among `categories`. Unknown or
/// undecodable identifiers are skipped.
pub fn builtin_commands<S: AsRef<str>>(categories: &[S]) -> Vec<CommandRecord> {
    let mut commands = Vec::new();
    for encoded in categories {
        let encoded = encoded.as_ref();
        let Some((ir_type, category)) = decode_category(encoded) else {
            warn!(category = encoded, "Cannot decode IR category");
            continue;
        };
        let Some(known) = BUILTIN_CATEGORIES
            .iter()
            .find(|c| c.ir_type == ir_type && c.category == category)
        else {
            warn!(category = encoded, "Unknown IR category, no built-in commands");
            continue;
        };

        debug!(
            category = encoded,
            count = known.buttons.len(),
            "Using built-in command list"
        );
        commands.extend(known.buttons.iter().map(|(name, code)| {
            let mut record = CommandRecord::new(*name)
                .with_value(encode_command(known.ir_type, known.category, *code));
            record.kind = Some("ircc".to_string());
            record
        }));
    }
    commands
}
