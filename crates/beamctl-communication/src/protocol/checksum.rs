//! Line-check framing
//!
//! In line-check mode every command is prefixed with its sequence number and
//! suffixed with a checksum so the firmware can detect corrupted or dropped
//! lines: `N<seq><command>*<crc>`.

/// Checksum of a line
///
/// Folds every non-space character left to right:
/// `crc = ((crc ^ c) + c) mod 65536`, starting at 0.
pub fn line_checksum(text: &str) -> u16 {
    text.chars()
        .filter(|c| *c != ' ')
        .fold(0u32, |crc, c| {
            let code = c as u32;
            ((crc ^ code) + code) % 65536
        }) as u16
}

/// Frame `command` with sequence number `seq`
pub fn frame_line(seq: u32, command: &str) -> String {
    let line = format!("N{}{}", seq, command);
    let crc = line_checksum(&line);
    format!("{}*{}", line, crc)
}
