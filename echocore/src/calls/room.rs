/// Derive the media room both participants join.
///
/// The two ids are ordered lexicographically, so caller and callee compute
/// the same room regardless of who initiated. Each id is escaped before the
/// join (`%` as `%25`, `:` as `%3A`), so distinct pairs never share a room.
pub fn room_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", escape(lo), escape(hi))
}

fn escape(id: &str) -> String {
    id.replace('%', "%25").replace(':', "%3A")
}
