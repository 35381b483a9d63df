//! The wire-protocol framing codec: encoder and incremental parser.

pub mod frame;
pub mod parser;

pub use frame::Frame;
pub use parser::{FrameBuffer, ParseError, ParseMode};

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let bytes = frame.encode();
        let mut buf = FrameBuffer::new(ParseMode::PeerReply);
        buf.extend(&bytes);
        let parsed = buf.try_parse().unwrap().expect("complete frame");
        assert_eq!(parsed, frame);
    }

    #[test]
    fn roundtrips_all_variants() {
        roundtrip(Frame::simple("OK"));
        roundtrip(Frame::error("ERR boom"));
        roundtrip(Frame::Integer(-17));
        roundtrip(Frame::bulk("hello"));
        roundtrip(Frame::bulk(""));
        roundtrip(Frame::null_bulk());
        roundtrip(Frame::null_array());
        roundtrip(Frame::array_of_bulks(["SET", "a", "1"]));
        roundtrip(Frame::Array(Some(vec![])));
    }

    #[test]
    fn parses_null_array() {
        let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
        buf.extend(b"*-1\r\n");
        assert_eq!(buf.try_parse().unwrap(), Some(Frame::null_array()));
    }

    #[test]
    fn parses_null_bulk() {
        let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
        buf.extend(b"$-1\r\n");
        assert_eq!(buf.try_parse().unwrap(), Some(Frame::null_bulk()));
    }

    #[test]
    fn parses_empty_bulk() {
        let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
        buf.extend(b"$0\r\n\r\n");
        assert_eq!(buf.try_parse().unwrap(), Some(Frame::bulk("")));
    }

    #[test]
    fn feeding_one_byte_at_a_time_matches_feeding_all_at_once() {
        let msg = Frame::array_of_bulks(["SET", "foo", "bar"]).encode();

        let mut whole = FrameBuffer::new(ParseMode::ClientRequest);
        whole.extend(&msg);
        let expected = whole.try_parse().unwrap().unwrap();

        let mut trickle = FrameBuffer::new(ParseMode::ClientRequest);
        let mut got = None;
        for byte in &msg {
            trickle.extend(std::slice::from_ref(byte));
            if let Some(frame) = trickle.try_parse().unwrap() {
                got = Some(frame);
                break;
            }
        }
        assert_eq!(got, Some(expected));
    }

    #[test]
    fn incomplete_frame_leaves_buffer_unchanged_and_parses_once_complete() {
        let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
        buf.extend(b"*1\r\n$4\r\nPI");
        assert!(buf.try_parse().unwrap().is_none());
        buf.extend(b"NG\r\n");
        assert_eq!(buf.try_parse().unwrap(), Some(Frame::array_of_bulks(["PING"])));
    }

    #[test]
    fn rejects_bad_prefix_at_top_level_for_client_requests() {
        let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
        buf.extend(b"+PONG\r\n");
        assert!(matches!(buf.try_parse(), Err(ParseError::UnexpectedPrefix(b'+'))));
    }

    #[test]
    fn accepts_simple_string_top_level_for_peer_replies() {
        let mut buf = FrameBuffer::new(ParseMode::PeerReply);
        buf.extend(b"+PONG\r\n");
        assert_eq!(buf.try_parse().unwrap(), Some(Frame::simple("PONG")));
    }

    #[test]
    fn rejects_non_digit_length() {
        let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
        buf.extend(b"$abc\r\nxxxx\r\n");
        assert!(matches!(buf.try_parse(), Err(ParseError::MalformedLength)));
    }

    #[test]
    fn two_frames_back_to_back_parse_in_order() {
        let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
        buf.extend(&Frame::array_of_bulks(["PING"]).encode());
        buf.extend(&Frame::array_of_bulks(["PING"]).encode());
        assert_eq!(buf.try_parse().unwrap(), Some(Frame::array_of_bulks(["PING"])));
        assert_eq!(buf.try_parse().unwrap(), Some(Frame::array_of_bulks(["PING"])));
        assert_eq!(buf.try_parse().unwrap(), None);
    }
}
