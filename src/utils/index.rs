use crate::history::Amount;

/// Number of drops in one unit of the native ledger currency.
pub const DROPS_PER_NATIVE_UNIT: u64 = 1_000_000;

/// Render a payment amount for display. Native amounts arrive as integer
/// drop strings; issued amounts carry their own decimal value and currency.
pub fn format_amount(amount: &Amount) -> String {
	match amount {
		Amount::Native(drops) => match drops.parse::<u64>() {
			Ok(drops) => format!("{:.6} STR", drops as f64 / DROPS_PER_NATIVE_UNIT as f64),
			Err(_) => format!("{} drops", drops),
		},
		Amount::Issued {
			value,
			currency,
			issuer,
		} => format!("{} {} ({})", value, currency, issuer),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn formats_native_and_issued_amounts() {
		assert_eq!(
			format_amount(&Amount::Native("2500000".to_string())),
			"2.500000 STR"
		);
		assert_eq!(
			format_amount(&Amount::Issued {
				value: "12.5".to_string(),
				currency: "USD".to_string(),
				issuer: "gISSUER".to_string(),
			}),
			"12.5 USD (gISSUER)"
		);
	}
}
