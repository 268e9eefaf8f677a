//! pkt-line framing: four-hex-digit length-prefixed lines, `0000` as the
//! flush packet.

/// The all-zero object id used in ref commands for creates and deletes.
pub const ZERO_ID: &str = "0000000000000000000000000000000000000000";

pub fn write_pkt(out: &mut Vec<u8>, payload: &[u8]) {
    let len = payload.len() + 4;
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(payload);
}

pub fn write_pkt_str(out: &mut Vec<u8>, payload: &str) {
    write_pkt(out, payload.as_bytes());
}

pub fn write_flush(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0000");
}

/// One `<old> <new> <ref>` command from a receive-pack request.
#[derive(Debug, Clone, PartialEq)]
pub struct RefCommand {
    pub old_id: String,
    pub new_id: String,
    pub ref_name: String,
}

/// Parses ref-update commands up to the first flush packet. Returns the
/// commands and the offset where the pack data begins. Capability lists
/// after the NUL byte are ignored.
pub fn parse_ref_commands(data: &[u8]) -> (Vec<RefCommand>, usize) {
    let mut commands = Vec::new();
    let mut pos = 0;

    while pos + 4 <= data.len() {
        let Some(len) = parse_pkt_len(&data[pos..pos + 4]) else {
            break;
        };

        if len == 0 {
            pos += 4;
            break;
        }
        if len < 4 || pos + len > data.len() {
            break;
        }

        let mut line = &data[pos + 4..pos + len];
        if let Some(nul) = line.iter().position(|&b| b == 0) {
            line = &line[..nul];
        }
        let line = String::from_utf8_lossy(line);
        let line = line.trim();

        let mut parts = line.split_whitespace();
        if let (Some(old_id), Some(new_id), Some(ref_name)) =
            (parts.next(), parts.next(), parts.next())
        {
            commands.push(RefCommand {
                old_id: old_id.to_string(),
                new_id: new_id.to_string(),
                ref_name: ref_name.to_string(),
            });
        }

        pos += len;
    }

    (commands, pos)
}

/// Extracts the object ids from `want` lines of an upload-pack request.
pub fn parse_wants(data: &[u8]) -> Vec<String> {
    let mut wants = Vec::new();
    let mut pos = 0;

    while pos + 4 <= data.len() {
        let Some(len) = parse_pkt_len(&data[pos..pos + 4]) else {
            break;
        };

        if len == 0 {
            pos += 4;
            continue;
        }
        if len < 4 || pos + len > data.len() {
            break;
        }

        let line = String::from_utf8_lossy(&data[pos + 4..pos + len]);
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("want ") {
            let id: String = rest.chars().take(40).collect();
            if id.len() == 40 {
                wants.push(id);
            }
        }

        pos += len;
    }

    wants
}

fn parse_pkt_len(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    usize::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkt_lines_are_length_prefixed() {
        let mut out = Vec::new();
        write_pkt_str(&mut out, "# service=git-upload-pack\n");
        write_flush(&mut out);
        assert_eq!(out, b"001e# service=git-upload-pack\n0000");
    }

    #[test]
    fn ref_commands_parse_and_stop_at_flush() {
        let mut body = Vec::new();
        write_pkt_str(
            &mut body,
            &format!(
                "{} {} refs/heads/main\0report-status\n",
                ZERO_ID, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
            ),
        );
        write_flush(&mut body);
        body.extend_from_slice(b"PACKDATA");

        let (commands, pack_start) = parse_ref_commands(&body);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].ref_name, "refs/heads/main");
        assert_eq!(commands[0].old_id, ZERO_ID);
        assert_eq!(&body[pack_start..], b"PACKDATA");
    }

    #[test]
    fn wants_parse_past_capability_suffixes() {
        let mut body = Vec::new();
        write_pkt_str(
            &mut body,
            "want bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb multi_ack_detailed\n",
        );
        write_pkt_str(&mut body, "want cccccccccccccccccccccccccccccccccccccccc\n");
        write_flush(&mut body);
        write_pkt_str(&mut body, "done\n");

        let wants = parse_wants(&body);
        assert_eq!(
            wants,
            vec![
                "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(),
                "cccccccccccccccccccccccccccccccccccccccc".to_string(),
            ]
        );
    }
}
