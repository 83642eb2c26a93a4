//! Mobile-money phone number normalization.
//!
//! Users type numbers in many shapes (`+237 6 77 12 34 56`, `00237677123456`,
//! `0677123456`, ...). Mobile-money rails want the national significant
//! number only, so every input is reduced to that form or rejected.

use crate::error::PaymentError;

/// Dialing rules for one destination country.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPlan {
    pub country_code: &'static str,
    pub nsn_len: usize,
    /// Leading digits a mobile NSN may start with.
    pub mobile_prefixes: &'static [u8],
    /// Legacy numbers one digit short that gain a leading digit when their
    /// first digit is in the given set.
    pub legacy_prefix: Option<(u8, &'static [u8])>,
}

pub const CAMEROON: DialPlan = DialPlan {
    country_code: "237",
    nsn_len: 9,
    mobile_prefixes: b"6",
    legacy_prefix: Some((b'6', b"579")),
};

pub const NIGERIA: DialPlan = DialPlan {
    country_code: "234",
    nsn_len: 10,
    mobile_prefixes: b"789",
    legacy_prefix: None,
};

impl DialPlan {
    /// Reduces `input` to the national significant number for this country.
    pub fn normalize(&self, input: &str) -> Result<String, PaymentError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PaymentError::MissingCounterpart(
                "phone number is required".to_string(),
            ));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'))
        {
            return Err(invalid(input));
        }

        let international = trimmed.starts_with('+');
        let mut digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();

        if international {
            digits = digits
                .strip_prefix(self.country_code)
                .ok_or_else(|| invalid(input))?
                .to_string();
        } else if let Some(rest) = digits
            .strip_prefix("00")
            .and_then(|d| d.strip_prefix(self.country_code))
        {
            digits = rest.to_string();
        } else if digits.len() > self.nsn_len
            && let Some(rest) = digits.strip_prefix(self.country_code)
        {
            digits = rest.to_string();
        }

        // Trunk prefix.
        if digits.len() == self.nsn_len + 1
            && let Some(rest) = digits.strip_prefix('0')
        {
            digits = rest.to_string();
        }

        if let Some((lead, legacy_starts)) = self.legacy_prefix
            && digits.len() == self.nsn_len - 1
            && digits.bytes().next().is_some_and(|b| legacy_starts.contains(&b))
        {
            digits.insert(0, char::from(lead));
        }

        let valid = digits.len() == self.nsn_len
            && digits
                .bytes()
                .next()
                .is_some_and(|b| self.mobile_prefixes.contains(&b));
        if valid { Ok(digits) } else { Err(invalid(input)) }
    }

    /// The normalized number with its `+<country>` prefix.
    pub fn to_international(&self, input: &str) -> Result<String, PaymentError> {
        Ok(format!("+{}{}", self.country_code, self.normalize(input)?))
    }
}

fn invalid(input: &str) -> PaymentError {
    PaymentError::MissingCounterpart(format!("invalid mobile number: {input}"))
}
