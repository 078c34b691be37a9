use std::fmt;

/// TIFF field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
}

impl EntryType {
    pub fn from(code: u16) -> Option<Self> {
        match code {
            1 => Some(EntryType::Byte),
            2 => Some(EntryType::Ascii),
            3 => Some(EntryType::Short),
            4 => Some(EntryType::Long),
            5 => Some(EntryType::Rational),
            6 => Some(EntryType::SByte),
            7 => Some(EntryType::Undefined),
            8 => Some(EntryType::SShort),
            9 => Some(EntryType::SLong),
            10 => Some(EntryType::SRational),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Bytes taken by one value of this type.
    pub fn size(&self) -> usize {
        match self {
            EntryType::Byte | EntryType::Ascii | EntryType::SByte | EntryType::Undefined => 1,
            EntryType::Short | EntryType::SShort => 2,
            EntryType::Long | EntryType::SLong => 4,
            EntryType::Rational | EntryType::SRational => 8,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            EntryType::SByte | EntryType::SShort | EntryType::SLong | EntryType::SRational
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: i64,
    pub denominator: i64,
}

impl Rational {
    pub fn new(numerator: i64, denominator: i64) -> Self {
        Rational {
            numerator,
            denominator,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self.denominator {
            0 => 0.0,
            d => self.numerator as f64 / d as f64,
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Rational(Rational),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Rational(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Rational(r) => write!(f, "{r}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Text(String),
    Values(Vec<Value>),
}

/// One tag value of an IFD: either a string or an ordered array of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    entry_type: EntryType,
    payload: Payload,
}

impl Entry {
    pub fn text(value: impl Into<String>) -> Self {
        Entry {
            entry_type: EntryType::Ascii,
            payload: Payload::Text(value.into()),
        }
    }

    pub fn values(entry_type: EntryType, values: Vec<Value>) -> Self {
        Entry {
            entry_type,
            payload: Payload::Values(values),
        }
    }

    pub fn integers(entry_type: EntryType, values: &[i64]) -> Self {
        Entry::values(entry_type, values.iter().map(|&v| Value::Integer(v)).collect())
    }

    pub fn bytes(entry_type: EntryType, bytes: &[u8]) -> Self {
        Entry::values(
            entry_type,
            bytes.iter().map(|&b| Value::Integer(b as i64)).collect(),
        )
    }

    pub fn short(value: u16) -> Self {
        Entry::integers(EntryType::Short, &[value as i64])
    }

    pub fn long(value: u32) -> Self {
        Entry::integers(EntryType::Long, &[value as i64])
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(s) => Some(s),
            Payload::Values(_) => None,
        }
    }

    pub fn as_values(&self) -> &[Value] {
        match &self.payload {
            Payload::Text(_) => &[],
            Payload::Values(values) => values,
        }
    }

    pub fn value(&self, index: usize) -> Option<Value> {
        self.as_values().get(index).copied()
    }

    pub fn integer(&self, index: usize) -> Option<i64> {
        self.value(index).and_then(|v| v.as_integer())
    }

    /// Sets value `index`, growing the array when needed. Gaps are zero-filled.
    pub fn set_value(&mut self, index: usize, value: Value) {
        if let Payload::Text(_) = self.payload {
            self.payload = Payload::Values(vec![]);
        }
        if let Payload::Values(values) = &mut self.payload {
            if index >= values.len() {
                values.resize(index + 1, Value::Integer(0));
            }
            values[index] = value;
        }
    }

    pub fn set_integer(&mut self, index: usize, value: i64) {
        self.set_value(index, Value::Integer(value));
    }

    pub fn set_text(&mut self, value: impl Into<String>) {
        self.payload = Payload::Text(value.into());
    }

    /// Number of values the entry declares in its count field.
    pub fn count(&self) -> usize {
        match &self.payload {
            Payload::Text(s) => s.len() + 1,
            Payload::Values(values) => values.len(),
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Text(s) => f.write_str(s),
            Payload::Values(values) => {
                for value in values {
                    match (self.entry_type, value) {
                        (EntryType::Undefined, Value::Integer(v)) => write!(f, "{v:x} ")?,
                        _ => write!(f, "{value} ")?,
                    }
                }
                Ok(())
            }
        }
    }
}
