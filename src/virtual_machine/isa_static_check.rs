#[cfg(test)]
mod tests {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    const EXPECTED_KEYWORD_HASH: u64 = 0x46ff79c0d9652b4f;

    fn fnv1a64(mut h: u64, bytes: &[u8]) -> u64 {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }

    macro_rules! hash_keywords {
        (
            $( $(#[$doc:meta])* $name:ident = $word:literal $( | $alias:literal )* ),* $(,)?
        ) => {{
            let mut h = FNV_OFFSET;
            $(
                h = fnv1a64(h, stringify!($name).as_bytes());
                h = fnv1a64(h, $word.as_bytes());
                $( h = fnv1a64(h, $alias.as_bytes()); )*
            )*
            h
        }};
    }

    fn current_keyword_hash() -> u64 {
        crate::for_each_keyword!(hash_keywords)
    }

    #[test]
    #[ignore]
    fn print_keyword_hash() {
        println!("KEYWORD_HASH=0x{:016x}", current_keyword_hash());
    }

    #[test]
    fn keyword_hash_unchanged() {
        assert_eq!(current_keyword_hash(), EXPECTED_KEYWORD_HASH);
    }
}
