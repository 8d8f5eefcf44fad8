//! Property attribute strings
//!
//! Attribute strings are comma separated; the first entry must be the type:
//!
//! | Entry     | Meaning                         |
//! |-----------|---------------------------------|
//! | `T<type>` | property type encoding          |
//! | `R`       | read-only                       |
//! | `C`       | copy                            |
//! | `&`       | retain                          |
//! | `W`       | weak                            |
//! | `N`       | nonatomic                       |
//! | `D`       | dynamic (accessors provided at runtime) |
//! | `G<name>` | custom getter selector          |
//! | `S<name>` | custom setter selector          |
//! | `V<name>` | backing variable name           |
//!
//! Without `C`, `&` or `W` the policy is assign; without `N` the property is
//! atomic.

use std::str::FromStr;

use crate::encoding::Encoding;
use crate::error::AttributeError;
use crate::property::OwnershipPolicy;

/// Parsed property attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAttributes {
    /// Property type encoding (sanitized)
    pub type_encoding: String,
    /// No setter
    pub readonly: bool,
    /// Setter policy
    pub policy: OwnershipPolicy,
    /// Reads and writes are not serialized
    pub nonatomic: bool,
    /// Accessors are supplied elsewhere
    pub dynamic: bool,
    /// Custom getter selector name
    pub getter: Option<String>,
    /// Custom setter selector name
    pub setter: Option<String>,
    /// Backing variable name
    pub ivar: Option<String>,
}

impl PropertyAttributes {
    /// Attributes for a read-write, atomic, assign property of `type_encoding`
    pub fn new(type_encoding: &str) -> Self {
        Self {
            type_encoding: type_encoding.to_string(),
            readonly: false,
            policy: OwnershipPolicy::Assign,
            nonatomic: false,
            dynamic: false,
            getter: None,
            setter: None,
            ivar: None,
        }
    }

    /// Parse an attribute string such as `T@"Name",&,N,V_name`
    pub fn parse(input: &str) -> Result<Self, AttributeError> {
        let rest = input.strip_prefix('T').ok_or(AttributeError::MissingType)?;
        let (encoding, used) = Encoding::parse_prefix(rest)?;
        let mut attrs = Self::new(&encoding.to_string());

        let rest = &rest[used..];
        let rest = match rest.strip_prefix(',') {
            Some(rest) => rest,
            None if rest.is_empty() => return Ok(attrs),
            None => {
                let token = rest.chars().next().unwrap_or(',');
                return Err(AttributeError::UnknownAttribute(token));
            }
        };

        let mut policy = None;
        for entry in rest.split(',') {
            let mut chars = entry.chars();
            let Some(code) = chars.next() else {
                continue;
            };
            let value = chars.as_str();
            match code {
                'R' => attrs.readonly = true,
                'N' => attrs.nonatomic = true,
                'D' => attrs.dynamic = true,
                'C' | '&' | 'W' => {
                    let p = match code {
                        'C' => OwnershipPolicy::Copy,
                        '&' => OwnershipPolicy::Retain,
                        _ => OwnershipPolicy::Weak,
                    };
                    if policy.replace(p).is_some_and(|previous| previous != p) {
                        return Err(AttributeError::ConflictingPolicies);
                    }
                }
                'G' => attrs.getter = Some(named(code, value)?),
                'S' => attrs.setter = Some(named(code, value)?),
                'V' => attrs.ivar = Some(named(code, value)?),
                // 'P' (garbage-collection eligible) and 't' (old-style type) carry no meaning here
                'P' | 't' => {}
                other => return Err(AttributeError::UnknownAttribute(other)),
            }
        }
        attrs.policy = policy.unwrap_or_default();
        Ok(attrs)
    }

    /// Whether reads and writes are serialized
    pub fn is_atomic(&self) -> bool {
        !self.nonatomic
    }

    /// Getter selector name for a property called `name`
    pub fn getter_name(&self, name: &str) -> String {
        self.getter.clone().unwrap_or_else(|| name.to_string())
    }

    /// Setter selector name for a property called `name`
    pub fn setter_name(&self, name: &str) -> String {
        self.setter
            .clone()
            .unwrap_or_else(|| default_setter_name(name))
    }
}

impl FromStr for PropertyAttributes {
    type Err = AttributeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyAttributes::parse(s)
    }
}

fn named(code: char, value: &str) -> Result<String, AttributeError> {
    if value.is_empty() {
        Err(AttributeError::MissingName(code))
    } else {
        Ok(value.to_string())
    }
}

/// `foo` -> `setFoo:`
pub fn default_setter_name(property: &str) -> String {
    let mut chars = property.chars();
    match chars.next() {
        Some(first) => format!("set{}{}:", first.to_uppercase(), chars.as_str()),
        None => "set:".to_string(),
    }
}
