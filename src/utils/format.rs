/// Render a raw token amount with the mint's decimals, without float rounding.
pub fn format_token_amount(amount: u64, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    format!("{}.{}", whole, fraction)
}
