use crate::BencodeValue;

/// Encode a [`BencodeValue`] to its canonical byte form.
///
/// Dictionary entries are emitted in ascending lexicographic key order no
/// matter what order the map iterates in, so equal dictionaries always
/// produce identical bytes. Info hashes depend on this.
pub fn encode(data: &BencodeValue) -> Vec<u8> {
    match data {
        BencodeValue::Integer(int) => format!("i{}e", int).into_bytes(),
        BencodeValue::ByteString(bytes) => {
            let mut out = format!("{}:", bytes.len()).into_bytes();
            out.extend_from_slice(bytes);
            out
        }
        BencodeValue::List(items) => {
            let mut out = vec![b'l'];
            for item in items {
                out.extend(encode(item));
            }
            out.push(b'e');
            out
        }
        BencodeValue::Dict(dict) => {
            let mut pairs = dict.iter().collect::<Vec<_>>();
            pairs.sort_by_key(|pair| pair.0);
            let mut out = vec![b'd'];
            for (key, value) in pairs {
                out.extend(format!("{}:", key.len()).into_bytes());
                out.extend_from_slice(key);
                out.extend(encode(value));
            }
            out.push(b'e');
            out
        }
    }
}
