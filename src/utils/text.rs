/// Convert a user-supplied ticker into the upstream symbol form (`btc/usdt` -> `BTCUSDT`).
/// Hyphens and underscores belong to contract names (`BTC-27DEC24`) and are kept.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let mut symbol = String::with_capacity(raw.len());

    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            symbol.push(ch.to_ascii_uppercase());
        } else if matches!(ch, '-' | '_') {
            symbol.push(ch);
        } else if ch == '/' {
            continue;
        } else {
            return None;
        }
    }

    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

/// Normalize a list of symbols, dropping invalid entries and duplicates while keeping order.
pub fn normalize_symbols<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut symbols: Vec<String> = Vec::new();
    for candidate in raw {
        if let Some(symbol) = normalize_symbol(candidate.as_ref()) {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
    }
    symbols
}
