use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    /// single byte types ('|' in numpy)
    NotApplicable,
}

/// numpy dtype restricted to plain numeric kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DType {
    /// numpy kind character: 'f' float, 'i' signed, 'u' unsigned, 'b' bool
    pub kind: char,
    pub size: usize,
    pub byte_order: ByteOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// elements in C (row-major) order, whatever order the file stored them in
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickleValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<PickleValue>),
    Tuple(Vec<PickleValue>),
    Set(Vec<PickleValue>),
    /// insertion ordered, keys are usually strings
    Dict(Vec<(PickleValue, PickleValue)>),
    Global {
        module: String,
        name: String,
    },
    /// anything built by a callable we don't know about
    Object {
        module: String,
        name: String,
        args: Vec<PickleValue>,
        state: Option<Box<PickleValue>>,
    },
    DType(DType),
    NdArray(NdArray),
    /// a memo entry shared by several places while decoding, `from_bytes` never returns one
    MemoRef(u64),
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

impl DType {
    pub fn new(kind: char, size: usize) -> DType {
        let byte_order = if size == 1 {
            ByteOrder::NotApplicable
        } else {
            ByteOrder::Little
        };
        DType {
            kind,
            size,
            byte_order,
        }
    }

    pub fn float32() -> DType {
        DType::new('f', 4)
    }

    pub fn float64() -> DType {
        DType::new('f', 8)
    }

    /// Parse a numpy type code such as `f4`, `<i8` or `float64`.
    pub fn parse(code: &str) -> Result<DType> {
        let (byte_order, code) = match code.chars().next() {
            Some('<') => (Some(ByteOrder::Little), &code[1..]),
            Some('>') => (Some(ByteOrder::Big), &code[1..]),
            Some('|') => (Some(ByteOrder::NotApplicable), &code[1..]),
            Some('=') => (None, &code[1..]),
            _ => (None, code),
        };
        let (kind, size) = match code {
            "float16" | "f2" => ('f', 2),
            "float32" | "f4" => ('f', 4),
            "float64" | "f8" => ('f', 8),
            "int8" | "i1" => ('i', 1),
            "int16" | "i2" => ('i', 2),
            "int32" | "i4" => ('i', 4),
            "int64" | "i8" => ('i', 8),
            "uint8" | "u1" => ('u', 1),
            "uint16" | "u2" => ('u', 2),
            "uint32" | "u4" => ('u', 4),
            "uint64" | "u8" => ('u', 8),
            "bool" | "b1" => ('b', 1),
            _ => return Err(Error::Pickle(format!("unsupported dtype '{code}'"))),
        };
        let mut dtype = DType::new(kind, size);
        if let Some(byte_order) = byte_order {
            if size > 1 {
                dtype.byte_order = byte_order;
            }
        }
        Ok(dtype)
    }

    /// The short code numpy uses when pickling the dtype (e.g. `f4`).
    pub fn code(&self) -> String {
        format!("{}{}", self.kind, self.size)
    }

    /// Human readable name, as `str(dtype)` prints it.
    pub fn name(&self) -> String {
        match self.kind {
            'f' => format!("float{}", self.size * 8),
            'i' => format!("int{}", self.size * 8),
            'u' => format!("uint{}", self.size * 8),
            _ => "bool".to_string(),
        }
    }

    fn byte_order_char(&self) -> &'static str {
        match self.byte_order {
            ByteOrder::Little => "<",
            ByteOrder::Big => ">",
            ByteOrder::NotApplicable => "|",
        }
    }

    /// Decode one element.
    fn read(&self, bytes: &[u8]) -> Result<f64> {
        fn arr<const N: usize>(bytes: &[u8], order: ByteOrder) -> [u8; N] {
            let mut out = [0u8; N];
            out.copy_from_slice(&bytes[..N]);
            if order == ByteOrder::Big {
                out.reverse();
            }
            out
        }
        let order = self.byte_order;
        let value = match (self.kind, self.size) {
            ('f', 4) => f32::from_le_bytes(arr::<4>(bytes, order)) as f64,
            ('f', 8) => f64::from_le_bytes(arr::<8>(bytes, order)),
            ('i', 1) => bytes[0] as i8 as f64,
            ('i', 2) => i16::from_le_bytes(arr::<2>(bytes, order)) as f64,
            ('i', 4) => i32::from_le_bytes(arr::<4>(bytes, order)) as f64,
            ('i', 8) => i64::from_le_bytes(arr::<8>(bytes, order)) as f64,
            ('u', 1) | ('b', 1) => bytes[0] as f64,
            ('u', 2) => u16::from_le_bytes(arr::<2>(bytes, order)) as f64,
            ('u', 4) => u32::from_le_bytes(arr::<4>(bytes, order)) as f64,
            ('u', 8) => u64::from_le_bytes(arr::<8>(bytes, order)) as f64,
            _ => {
                return Err(Error::Pickle(format!(
                    "dtype {} can't be converted to numbers",
                    self.name()
                )))
            }
        };
        Ok(value)
    }

    /// Encode one element, little endian.
    fn write(&self, value: f64, out: &mut Vec<u8>) -> Result<()> {
        match (self.kind, self.size) {
            ('f', 4) => out.extend_from_slice(&(value as f32).to_le_bytes()),
            ('f', 8) => out.extend_from_slice(&value.to_le_bytes()),
            ('i', 4) => out.extend_from_slice(&(value as i32).to_le_bytes()),
            ('i', 8) => out.extend_from_slice(&(value as i64).to_le_bytes()),
            _ => {
                return Err(Error::Pickle(format!(
                    "writing dtype {} is not supported",
                    self.name()
                )))
            }
        }
        Ok(())
    }
}

/// Number of elements of an array of `shape`. Errors when the shape, or any part of it, overflows.
fn element_count(shape: &[usize]) -> Result<usize> {
    let overflow = || Error::Pickle(format!("array shape {:?} is too large", shape));
    //// sub-shapes of an empty array are still walked when nesting
    shape
        .iter()
        .filter(|&&n| n != 0)
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(overflow)?;
    shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(overflow)
}

impl NdArray {
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<f64>) -> Result<NdArray> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(Error::Pickle(format!(
                "array of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(NdArray { shape, dtype, data })
    }

    /// Split a 2-D array into rows.
    pub fn rows(&self) -> Result<Vec<Vec<f64>>> {
        match self.shape.as_slice() {
            [rows, cols] => Ok((0..*rows)
                .map(|r| self.data[r * cols..(r + 1) * cols].to_vec())
                .collect()),
            shape => Err(Error::Pickle(format!(
                "expected a 2-D array, got shape {:?}",
                shape
            ))),
        }
    }

    /// Nested json lists following the shape (what `ndarray.tolist()` gives).
    pub fn to_json_value(&self) -> Value {
        fn nest(data: &[f64], shape: &[usize], dtype: &DType) -> Value {
            match shape.split_first() {
                None => number_json(data[0], dtype),
                Some((&n, rest)) => {
                    let stride: usize = rest.iter().product();
                    Value::Array(
                        (0..n)
                            .map(|i| nest(&data[i * stride..(i + 1) * stride], rest, dtype))
                            .collect(),
                    )
                }
            }
        }
        nest(&self.data, &self.shape, &self.dtype)
    }
}

fn number_json(value: f64, dtype: &DType) -> Value {
    match dtype.kind {
        'f' => json!(value),
        'b' => json!(value != 0.0),
        _ => json!(value as i64),
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

impl PickleValue {
    /// Look up a string key in a dict.
    pub fn get(&self, key: &str) -> Option<&PickleValue> {
        match self {
            PickleValue::Dict(items) => items.iter().find_map(|(k, v)| match k {
                PickleValue::Str(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PickleValue::Int(i) => Some(*i as f64),
            PickleValue::Float(f) => Some(*f),
            PickleValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            PickleValue::NdArray(arr) if arr.shape.is_empty() && arr.data.len() == 1 => {
                Some(arr.data[0])
            }
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PickleValue::Int(i) => Some(*i),
            PickleValue::Bool(b) => Some(*b as i64),
            PickleValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Python type name of the value.
    pub fn type_name(&self) -> String {
        match self {
            PickleValue::None => "NoneType".to_string(),
            PickleValue::Bool(_) => "bool".to_string(),
            PickleValue::Int(_) => "int".to_string(),
            PickleValue::Float(_) => "float".to_string(),
            PickleValue::Str(_) => "str".to_string(),
            PickleValue::Bytes(_) => "bytes".to_string(),
            PickleValue::List(_) => "list".to_string(),
            PickleValue::Tuple(_) => "tuple".to_string(),
            PickleValue::Set(_) => "set".to_string(),
            PickleValue::Dict(_) => "dict".to_string(),
            PickleValue::Global { .. } => "type".to_string(),
            PickleValue::Object { name, .. } => name.clone(),
            PickleValue::DType(_) => "dtype".to_string(),
            PickleValue::NdArray(_) => "numpy.ndarray".to_string(),
            PickleValue::MemoRef(_) => "memo reference".to_string(),
        }
    }

    /// Plain json conversion. Non string dict keys are stringified.
    pub fn to_json_value(&self) -> Value {
        match self {
            PickleValue::None => Value::Null,
            PickleValue::Bool(b) => json!(b),
            PickleValue::Int(i) => json!(i),
            PickleValue::Float(f) => json!(f),
            PickleValue::Str(s) => json!(s),
            PickleValue::Bytes(b) => json!(b),
            PickleValue::List(items) | PickleValue::Tuple(items) | PickleValue::Set(items) => {
                Value::Array(items.iter().map(|v| v.to_json_value()).collect())
            }
            PickleValue::Dict(items) => Value::Object(
                items
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            PickleValue::Str(s) => s.clone(),
                            other => other.to_json_value().to_string(),
                        };
                        (key, v.to_json_value())
                    })
                    .collect(),
            ),
            PickleValue::Global { module, name } => json!(format!("{module}.{name}")),
            PickleValue::Object { module, name, .. } => json!(format!("<{module}.{name} object>")),
            PickleValue::DType(dtype) => json!(dtype.name()),
            PickleValue::NdArray(arr) => arr.to_json_value(),
            PickleValue::MemoRef(key) => json!(format!("<memo {key}>")),
        }
    }

    /// Describe every entry of a top level dict the way the raw inspector shows it:
    /// arrays with their shape/dtype/data, everything else with its type and value.
    pub fn describe_entries(&self) -> Result<Value> {
        let PickleValue::Dict(items) = self else {
            return Err(Error::Pickle(format!(
                "expected a dict at the top level, got {}",
                self.type_name()
            )));
        };
        let mut out = serde_json::Map::new();
        for (key, value) in items {
            let key = match key {
                PickleValue::Str(s) => s.clone(),
                other => other.to_json_value().to_string(),
            };
            let entry = match value {
                PickleValue::NdArray(arr) => json!({
                    "type": "numpy.ndarray",
                    "shape": arr.shape,
                    "dtype": arr.dtype.name(),
                    "data": arr.to_json_value(),
                }),
                other => json!({
                    "type": other.type_name(),
                    "value": other.to_json_value(),
                }),
            };
            out.insert(key, entry);
        }
        Ok(Value::Object(out))
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
    pub const BYTEARRAY8: u8 = 0x96;
}

/// Upper bound on the size of a decoded value, counted in elements. Memo references can repeat an
/// object any number of times.
const MAX_DECODED_SIZE: usize = 1 << 25;

struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<PickleValue>,
    marks: Vec<usize>,
    memo: HashMap<u64, PickleValue>,
}

impl<'a> Unpickler<'a> {
    fn new(data: &'a [u8]) -> Self {
        Unpickler {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    //// READING PRIMITIVES

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::Pickle(format!("unexpected end of data at byte {}", self.pos)))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_len4(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array::<4>()?) as usize)
    }

    fn take_len8(&mut self) -> Result<usize> {
        usize::try_from(u64::from_le_bytes(self.take_array::<8>()?))
            .map_err(|_| Error::Pickle("length does not fit in memory".to_string()))
    }

    /// Text argument terminated by '\n' (protocol 0 opcodes).
    fn take_line(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Pickle("unterminated text argument".to_string()))?;
        self.pos += end + 1;
        std::str::from_utf8(&rest[..end])
            .map_err(|_| Error::Pickle("text argument is not utf-8".to_string()))
    }

    fn take_utf8(&mut self, n: usize) -> Result<String> {
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Pickle("string is not valid utf-8".to_string()))
    }

    //// STACK HELPERS

    fn pop(&mut self) -> Result<PickleValue> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(Error::Pickle(format!("stack underflow at byte {}", self.pos)));
        }
        self.stack
            .pop()
            .ok_or_else(|| Error::Pickle("stack underflow".to_string()))
    }

    fn top(&mut self) -> Result<&mut PickleValue> {
        self.stack
            .last_mut()
            .ok_or_else(|| Error::Pickle(format!("stack underflow at byte {}", self.pos)))
    }

    fn pop_mark(&mut self) -> Result<Vec<PickleValue>> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| Error::Pickle("mark not found".to_string()))?;
        Ok(self.stack.split_off(mark))
    }

    /// The object that APPEND, SETITEM, BUILD and friends modify: the top of the stack, or the memo
    /// entry it refers to.
    fn target(&mut self) -> Result<&mut PickleValue> {
        let key = match self.stack.last() {
            Some(PickleValue::MemoRef(key)) => Some(*key),
            Some(_) => None,
            None => return Err(Error::Pickle(format!("stack underflow at byte {}", self.pos))),
        };
        let Some(mut key) = key else {
            return self.top();
        };
        for _ in 0..=self.memo.len() {
            let next = match self.memo.get(&key) {
                Some(PickleValue::MemoRef(next)) => Some(*next),
                Some(_) => None,
                None => return Err(Error::Pickle(format!("memo key {key} not found"))),
            };
            match next {
                Some(next) => key = next,
                None => {
                    return self
                        .memo
                        .get_mut(&key)
                        .ok_or_else(|| Error::Pickle(format!("memo key {key} not found")))
                }
            }
        }
        Err(Error::Pickle("memo entries refer to each other in a cycle".to_string()))
    }

    fn memo_get(&self, key: u64) -> Result<PickleValue> {
        if !self.memo.contains_key(&key) {
            return Err(Error::Pickle(format!("memo key {key} not found")));
        }
        Ok(PickleValue::MemoRef(key))
    }

    /// Move the top of the stack into the memo, leaving a reference in its place so later changes to
    /// the object show through every GET of it.
    fn memo_put(&mut self, key: u64) -> Result<()> {
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| Error::Pickle("nothing to memoize".to_string()))?;
        let existing = match top {
            PickleValue::MemoRef(existing) => Some(*existing),
            _ => None,
        };
        match existing {
            Some(existing) if existing == key => {}
            //// memoized twice, both keys name the same object
            Some(existing) => {
                self.memo.insert(key, PickleValue::MemoRef(existing));
            }
            None => {
                let value = std::mem::replace(top, PickleValue::MemoRef(key));
                self.memo.insert(key, value);
            }
        }
        Ok(())
    }

    /// Pop a value that is about to be taken apart (arguments, states, globals) with its memo
    /// references replaced.
    fn pop_resolved(&mut self) -> Result<PickleValue> {
        let value = self.pop()?;
        self.resolve(value)
    }

    fn resolve(&self, value: PickleValue) -> Result<PickleValue> {
        let mut budget = MAX_DECODED_SIZE;
        self.resolve_inner(value, &mut Vec::new(), &mut budget)
    }

    fn resolve_inner(
        &self,
        value: PickleValue,
        path: &mut Vec<u64>,
        budget: &mut usize,
    ) -> Result<PickleValue> {
        let size = match &value {
            PickleValue::Str(s) => 1 + s.len() / 8,
            PickleValue::Bytes(b) => 1 + b.len() / 8,
            PickleValue::NdArray(arr) => 1 + arr.data.len(),
            _ => 1,
        };
        *budget = budget
            .checked_sub(size)
            .ok_or_else(|| Error::Pickle("pickle expands to too many objects".to_string()))?;

        Ok(match value {
            PickleValue::MemoRef(key) => {
                if path.contains(&key) {
                    return Err(Error::Pickle(format!(
                        "memo entry {key} contains itself"
                    )));
                }
                let shared = self
                    .memo
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| Error::Pickle(format!("memo key {key} not found")))?;
                path.push(key);
                let resolved = self.resolve_inner(shared, path, budget)?;
                path.pop();
                resolved
            }
            PickleValue::List(items) => PickleValue::List(self.resolve_items(items, path, budget)?),
            PickleValue::Tuple(items) => PickleValue::Tuple(self.resolve_items(items, path, budget)?),
            PickleValue::Set(items) => PickleValue::Set(self.resolve_items(items, path, budget)?),
            PickleValue::Dict(items) => PickleValue::Dict(
                items
                    .into_iter()
                    .map(|(k, v)| {
                        let k = self.resolve_inner(k, path, budget)?;
                        let v = self.resolve_inner(v, path, budget)?;
                        Ok((k, v))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            PickleValue::Object {
                module,
                name,
                args,
                state,
            } => {
                let args = self.resolve_items(args, path, budget)?;
                let state = match state {
                    Some(state) => Some(Box::new(self.resolve_inner(*state, path, budget)?)),
                    None => None,
                };
                PickleValue::Object {
                    module,
                    name,
                    args,
                    state,
                }
            }
            other => other,
        })
    }

    fn resolve_items(
        &self,
        items: Vec<PickleValue>,
        path: &mut Vec<u64>,
        budget: &mut usize,
    ) -> Result<Vec<PickleValue>> {
        items
            .into_iter()
            .map(|item| self.resolve_inner(item, path, budget))
            .collect()
    }

    /// Dict keys are compared when inserting, so they are resolved right away.
    fn resolve_keys(
        &self,
        items: Vec<(PickleValue, PickleValue)>,
    ) -> Result<Vec<(PickleValue, PickleValue)>> {
        items
            .into_iter()
            .map(|(k, v)| Ok((self.resolve(k)?, v)))
            .collect()
    }

    //// MAIN LOOP

    fn load(mut self) -> Result<PickleValue> {
        loop {
            let code = self.take_u8()?;
            match code {
                op::PROTO => {
                    let version = self.take_u8()?;
                    if version > 5 {
                        return Err(Error::Pickle(format!(
                            "unsupported pickle protocol {version}"
                        )));
                    }
                }
                op::FRAME => {
                    self.take_len8()?;
                }
                op::STOP => {
                    return self.pop_resolved();
                }
                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    if self.marks.last() == Some(&self.stack.len()) {
                        self.marks.pop();
                    } else {
                        self.pop()?;
                    }
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }

                //// CONSTANTS AND NUMBERS
                op::NONE => self.stack.push(PickleValue::None),
                op::NEWTRUE => self.stack.push(PickleValue::Bool(true)),
                op::NEWFALSE => self.stack.push(PickleValue::Bool(false)),
                op::INT => {
                    let line = self.take_line()?;
                    let value = match line {
                        "01" => PickleValue::Bool(true),
                        "00" => PickleValue::Bool(false),
                        _ => PickleValue::Int(parse_int_text(line)?),
                    };
                    self.stack.push(value);
                }
                op::LONG => {
                    let line = self.take_line()?;
                    let value = parse_int_text(line.trim_end_matches('L'))?;
                    self.stack.push(PickleValue::Int(value));
                }
                op::BININT => {
                    let value = i32::from_le_bytes(self.take_array::<4>()?);
                    self.stack.push(PickleValue::Int(value as i64));
                }
                op::BININT1 => {
                    let value = self.take_u8()?;
                    self.stack.push(PickleValue::Int(value as i64));
                }
                op::BININT2 => {
                    let value = u16::from_le_bytes(self.take_array::<2>()?);
                    self.stack.push(PickleValue::Int(value as i64));
                }
                op::LONG1 => {
                    let n = self.take_u8()? as usize;
                    let bytes = self.take(n)?;
                    self.stack.push(PickleValue::Int(decode_long(bytes)?));
                }
                op::LONG4 => {
                    let n = self.take_len4()?;
                    let bytes = self.take(n)?;
                    self.stack.push(PickleValue::Int(decode_long(bytes)?));
                }
                op::FLOAT => {
                    let line = self.take_line()?;
                    let value = line
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| Error::Pickle(format!("invalid float '{line}'")))?;
                    self.stack.push(PickleValue::Float(value));
                }
                op::BINFLOAT => {
                    let value = f64::from_be_bytes(self.take_array::<8>()?);
                    self.stack.push(PickleValue::Float(value));
                }

                //// STRINGS AND BYTES
                op::STRING => {
                    let line = self.take_line()?;
                    let unquoted = line
                        .strip_prefix('\'')
                        .and_then(|s| s.strip_suffix('\''))
                        .or_else(|| line.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
                        .ok_or_else(|| Error::Pickle("STRING argument is not quoted".to_string()))?;
                    self.stack.push(PickleValue::Str(unquoted.to_string()));
                }
                op::BINSTRING => {
                    let n = self.take_len4()?;
                    let bytes = self.take(n)?;
                    self.stack.push(PickleValue::Str(latin1_to_string(bytes)));
                }
                op::SHORT_BINSTRING => {
                    let n = self.take_u8()? as usize;
                    let bytes = self.take(n)?;
                    self.stack.push(PickleValue::Str(latin1_to_string(bytes)));
                }
                op::UNICODE => {
                    let line = self.take_line()?;
                    self.stack.push(PickleValue::Str(line.to_string()));
                }
                op::BINUNICODE => {
                    let n = self.take_len4()?;
                    let s = self.take_utf8(n)?;
                    self.stack.push(PickleValue::Str(s));
                }
                op::SHORT_BINUNICODE => {
                    let n = self.take_u8()? as usize;
                    let s = self.take_utf8(n)?;
                    self.stack.push(PickleValue::Str(s));
                }
                op::BINUNICODE8 => {
                    let n = self.take_len8()?;
                    let s = self.take_utf8(n)?;
                    self.stack.push(PickleValue::Str(s));
                }
                op::BINBYTES => {
                    let n = self.take_len4()?;
                    let bytes = self.take(n)?.to_vec();
                    self.stack.push(PickleValue::Bytes(bytes));
                }
                op::SHORT_BINBYTES => {
                    let n = self.take_u8()? as usize;
                    let bytes = self.take(n)?.to_vec();
                    self.stack.push(PickleValue::Bytes(bytes));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let n = self.take_len8()?;
                    let bytes = self.take(n)?.to_vec();
                    self.stack.push(PickleValue::Bytes(bytes));
                }

                //// CONTAINERS
                op::EMPTY_DICT => self.stack.push(PickleValue::Dict(Vec::new())),
                op::DICT => {
                    let items = self.pop_mark()?;
                    let dict = self.resolve_keys(pairs(items)?)?;
                    self.stack.push(PickleValue::Dict(dict));
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop_resolved()?;
                    dict_insert(self.target()?, vec![(key, value)])?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    let items = self.resolve_keys(pairs(items)?)?;
                    dict_insert(self.target()?, items)?;
                }
                op::EMPTY_LIST => self.stack.push(PickleValue::List(Vec::new())),
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(PickleValue::List(items));
                }
                op::APPEND => {
                    let value = self.pop()?;
                    list_extend(self.target()?, vec![value])?;
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    list_extend(self.target()?, items)?;
                }
                op::EMPTY_TUPLE => self.stack.push(PickleValue::Tuple(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(PickleValue::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = (code - op::TUPLE1 + 1) as usize;
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(self.pop()?);
                    }
                    items.reverse();
                    self.stack.push(PickleValue::Tuple(items));
                }
                op::EMPTY_SET => self.stack.push(PickleValue::Set(Vec::new())),
                op::ADDITEMS => {
                    let items = self.pop_mark()?;
                    match self.target()? {
                        PickleValue::Set(set) => set.extend(items),
                        other => {
                            return Err(Error::Pickle(format!(
                                "ADDITEMS on {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                op::FROZENSET => {
                    let items = self.pop_mark()?;
                    self.stack.push(PickleValue::Set(items));
                }

                //// OBJECTS
                op::GLOBAL => {
                    let module = self.take_line()?.to_string();
                    let name = self.take_line()?.to_string();
                    self.stack.push(PickleValue::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop_resolved()?;
                    let module = self.pop_resolved()?;
                    match (module, name) {
                        (PickleValue::Str(module), PickleValue::Str(name)) => {
                            self.stack.push(PickleValue::Global { module, name })
                        }
                        _ => {
                            return Err(Error::Pickle(
                                "STACK_GLOBAL expects two strings".to_string(),
                            ))
                        }
                    }
                }
                op::REDUCE => {
                    let args = self.pop_resolved()?;
                    let callable = self.pop_resolved()?;
                    let args = match args {
                        PickleValue::Tuple(args) => args,
                        other => {
                            return Err(Error::Pickle(format!(
                                "REDUCE arguments must be a tuple, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    let value = reduce(callable, args)?;
                    self.stack.push(value);
                }
                op::NEWOBJ => {
                    let args = self.pop_resolved()?;
                    let cls = self.pop_resolved()?;
                    let args = match args {
                        PickleValue::Tuple(args) => args,
                        other => vec![other],
                    };
                    self.stack.push(new_object(cls, args)?);
                }
                op::NEWOBJ_EX => {
                    let _kwargs = self.pop()?;
                    let args = self.pop_resolved()?;
                    let cls = self.pop_resolved()?;
                    let args = match args {
                        PickleValue::Tuple(args) => args,
                        other => vec![other],
                    };
                    self.stack.push(new_object(cls, args)?);
                }
                op::BUILD => {
                    let state = self.pop_resolved()?;
                    build(self.target()?, state)?;
                }

                //// MEMO
                op::PUT => {
                    let key = parse_int_text(self.take_line()?)? as u64;
                    self.memo_put(key)?;
                }
                op::BINPUT => {
                    let key = self.take_u8()? as u64;
                    self.memo_put(key)?;
                }
                op::LONG_BINPUT => {
                    let key = self.take_len4()? as u64;
                    self.memo_put(key)?;
                }
                op::MEMOIZE => {
                    let key = self.memo.len() as u64;
                    self.memo_put(key)?;
                }
                op::GET => {
                    let key = parse_int_text(self.take_line()?)? as u64;
                    let value = self.memo_get(key)?;
                    self.stack.push(value);
                }
                op::BINGET => {
                    let key = self.take_u8()? as u64;
                    let value = self.memo_get(key)?;
                    self.stack.push(value);
                }
                op::LONG_BINGET => {
                    let key = self.take_len4()? as u64;
                    let value = self.memo_get(key)?;
                    self.stack.push(value);
                }
                other => {
                    return Err(Error::Pickle(format!(
                        "unsupported opcode 0x{other:02x} at byte {}",
                        self.pos - 1
                    )))
                }
            }
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn parse_int_text(text: &str) -> Result<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| Error::Pickle(format!("invalid integer '{text}'")))
}

/// Little endian two's complement integer of arbitrary length (LONG1/LONG4).
fn decode_long(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(Error::Pickle("integer does not fit in 64 bits".to_string()));
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn string_to_latin1(s: &str) -> Result<Vec<u8>> {
    s.chars()
        .map(|c| {
            u8::try_from(c as u32)
                .map_err(|_| Error::Pickle(format!("character {c:?} is not latin-1")))
        })
        .collect()
}

fn pairs(items: Vec<PickleValue>) -> Result<Vec<(PickleValue, PickleValue)>> {
    if items.len() % 2 != 0 {
        return Err(Error::Pickle("odd number of dict items".to_string()));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        out.push((k, v));
    }
    Ok(out)
}

fn dict_insert(target: &mut PickleValue, items: Vec<(PickleValue, PickleValue)>) -> Result<()> {
    match target {
        PickleValue::Dict(dict) => {
            insert_pairs(dict, items);
            Ok(())
        }
        other => Err(Error::Pickle(format!(
            "can't set items on {}",
            other.type_name()
        ))),
    }
}

fn insert_pairs(dict: &mut Vec<(PickleValue, PickleValue)>, items: Vec<(PickleValue, PickleValue)>) {
    for (key, value) in items {
        match dict.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => dict.push((key, value)),
        }
    }
}

fn list_extend(target: &mut PickleValue, items: Vec<PickleValue>) -> Result<()> {
    match target {
        PickleValue::List(list) => {
            list.extend(items);
            Ok(())
        }
        other => Err(Error::Pickle(format!("can't append to {}", other.type_name()))),
    }
}

fn is_numpy_multiarray(module: &str) -> bool {
    matches!(
        module,
        "numpy.core.multiarray" | "numpy._core.multiarray" | "numpy.core._multiarray_umath"
            | "numpy._core._multiarray_umath"
    )
}

/// Apply a callable to its arguments for the handful of callables motion files use.
fn reduce(callable: PickleValue, args: Vec<PickleValue>) -> Result<PickleValue> {
    let PickleValue::Global { module, name } = callable else {
        return Err(Error::Pickle(format!(
            "can't call a {}",
            callable.type_name()
        )));
    };
    match (module.as_str(), name.as_str()) {
        (m, "_reconstruct") if is_numpy_multiarray(m) => {
            //// placeholder, BUILD fills in shape, dtype and data
            Ok(PickleValue::NdArray(NdArray {
                shape: vec![0],
                dtype: DType::float64(),
                data: Vec::new(),
            }))
        }
        (m, "scalar") if is_numpy_multiarray(m) => {
            let (dtype, raw) = match args.as_slice() {
                [PickleValue::DType(dtype), raw] => (dtype.clone(), raw),
                _ => return Err(Error::Pickle("bad numpy scalar arguments".to_string())),
            };
            let bytes = raw_bytes(raw)?;
            if bytes.len() != dtype.size {
                return Err(Error::Pickle(format!(
                    "numpy scalar of {} needs {} bytes, got {}",
                    dtype.name(),
                    dtype.size,
                    bytes.len()
                )));
            }
            let value = dtype.read(&bytes)?;
            Ok(match dtype.kind {
                'f' => PickleValue::Float(value),
                'b' => PickleValue::Bool(value != 0.0),
                _ => PickleValue::Int(value as i64),
            })
        }
        ("numpy", "dtype") => match args.first() {
            Some(PickleValue::Str(code)) => Ok(PickleValue::DType(DType::parse(code)?)),
            _ => Err(Error::Pickle("numpy.dtype expects a type code".to_string())),
        },
        ("_codecs", "encode") => match args.as_slice() {
            [PickleValue::Str(s), PickleValue::Str(encoding)] if encoding == "latin1" => {
                Ok(PickleValue::Bytes(string_to_latin1(s)?))
            }
            [PickleValue::Str(s), ..] => Ok(PickleValue::Bytes(s.as_bytes().to_vec())),
            _ => Err(Error::Pickle("bad _codecs.encode arguments".to_string())),
        },
        ("builtins" | "__builtin__", "bytes" | "bytearray") => match args.first() {
            None => Ok(PickleValue::Bytes(Vec::new())),
            Some(PickleValue::Bytes(b)) => Ok(PickleValue::Bytes(b.clone())),
            Some(PickleValue::List(items)) => items
                .iter()
                .map(|v| {
                    v.as_i64()
                        .and_then(|i| u8::try_from(i).ok())
                        .ok_or_else(|| Error::Pickle("bytes item out of range".to_string()))
                })
                .collect::<Result<Vec<u8>>>()
                .map(PickleValue::Bytes),
            Some(other) => Err(Error::Pickle(format!(
                "can't build bytes from {}",
                other.type_name()
            ))),
        },
        ("builtins" | "__builtin__", "set" | "frozenset") => match args.into_iter().next() {
            None => Ok(PickleValue::Set(Vec::new())),
            Some(PickleValue::List(items)) | Some(PickleValue::Tuple(items)) => {
                Ok(PickleValue::Set(items))
            }
            Some(other) => Err(Error::Pickle(format!(
                "can't build a set from {}",
                other.type_name()
            ))),
        },
        _ => Ok(PickleValue::Object {
            module: module.clone(),
            name: name.clone(),
            args,
            state: None,
        }),
    }
}

fn new_object(cls: PickleValue, args: Vec<PickleValue>) -> Result<PickleValue> {
    match cls {
        PickleValue::Global { module, name } => Ok(PickleValue::Object {
            module,
            name,
            args,
            state: None,
        }),
        other => Err(Error::Pickle(format!(
            "can't instantiate a {}",
            other.type_name()
        ))),
    }
}

fn raw_bytes(value: &PickleValue) -> Result<Vec<u8>> {
    match value {
        PickleValue::Bytes(b) => Ok(b.clone()),
        //// python 2 pickles store raw data as latin-1 strings
        PickleValue::Str(s) => string_to_latin1(s),
        other => Err(Error::Pickle(format!(
            "expected raw bytes, got {}",
            other.type_name()
        ))),
    }
}

/// Apply a BUILD state to the object on top of the stack.
fn build(target: &mut PickleValue, state: PickleValue) -> Result<()> {
    match target {
        PickleValue::NdArray(arr) => {
            *arr = ndarray_from_state(state)?;
            Ok(())
        }
        PickleValue::DType(dtype) => {
            //// (version, byteorder, subarray, names, fields, elsize, alignment, flags)
            if let PickleValue::Tuple(items) = &state {
                if let Some(PickleValue::Str(order)) = items.get(1) {
                    dtype.byte_order = match (order.as_str(), dtype.size) {
                        (_, 1) | ("|", _) => ByteOrder::NotApplicable,
                        (">", _) => ByteOrder::Big,
                        _ => ByteOrder::Little,
                    };
                }
            }
            Ok(())
        }
        PickleValue::Object { state: slot, .. } => {
            *slot = Some(Box::new(state));
            Ok(())
        }
        PickleValue::Dict(dict) => {
            if let PickleValue::Dict(items) = state {
                insert_pairs(dict, items);
            }
            Ok(())
        }
        other => Err(Error::Pickle(format!("can't BUILD a {}", other.type_name()))),
    }
}

fn shape_from_value(value: &PickleValue) -> Result<Vec<usize>> {
    match value {
        PickleValue::Tuple(items) | PickleValue::List(items) => items
            .iter()
            .map(|v| {
                v.as_i64()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| Error::Pickle("array shape must be non-negative ints".to_string()))
            })
            .collect(),
        other => Err(Error::Pickle(format!(
            "array shape must be a tuple, got {}",
            other.type_name()
        ))),
    }
}

/// Convert a fortran (column-major) buffer into C order.
fn fortran_to_c(data: Vec<f64>, shape: &[usize]) -> Vec<f64> {
    if shape.len() < 2 {
        return data;
    }
    let n = data.len();
    let mut out = vec![0.0; n];
    let mut index = vec![0usize; shape.len()];
    for c in 0..n {
        //// fortran linear index of the multi-index
        let mut f = 0;
        let mut stride = 1;
        for (axis, &i) in index.iter().enumerate() {
            f += i * stride;
            stride *= shape[axis];
        }
        out[c] = data[f];
        //// increment the multi-index in C order
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

fn ndarray_from_state(state: PickleValue) -> Result<NdArray> {
    let PickleValue::Tuple(items) = state else {
        return Err(Error::Pickle("ndarray state must be a tuple".to_string()));
    };
    //// (version, shape, dtype, is_fortran, rawdata), version is optional
    let items: &[PickleValue] = match items.len() {
        5 => &items[1..],
        4 => &items[..],
        n => {
            return Err(Error::Pickle(format!(
                "ndarray state has {n} items, expected 4 or 5"
            )))
        }
    };
    let shape = shape_from_value(&items[0])?;
    let dtype = match &items[1] {
        PickleValue::DType(dtype) => dtype.clone(),
        other => {
            return Err(Error::Pickle(format!(
                "ndarray dtype must be a dtype, got {}",
                other.type_name()
            )))
        }
    };
    let fortran_order = matches!(items[2], PickleValue::Bool(true) | PickleValue::Int(1));
    let count = element_count(&shape)?;

    let data = match &items[3] {
        PickleValue::List(values) => values
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| Error::Pickle("object array holds non numbers".to_string()))
            })
            .collect::<Result<Vec<f64>>>()?,
        raw => {
            let bytes = raw_bytes(raw)?;
            let byte_size = count.checked_mul(dtype.size).ok_or_else(|| {
                Error::Pickle(format!("array shape {:?} is too large", shape))
            })?;
            if bytes.len() != byte_size {
                return Err(Error::Pickle(format!(
                    "array of shape {:?} and dtype {} needs {} bytes, got {}",
                    shape,
                    dtype.name(),
                    byte_size,
                    bytes.len()
                )));
            }
            bytes
                .chunks_exact(dtype.size)
                .map(|chunk| dtype.read(chunk))
                .collect::<Result<Vec<f64>>>()?
        }
    };
    let data = if fortran_order {
        fortran_to_c(data, &shape)
    } else {
        data
    };
    NdArray::new(shape, dtype, data)
}

//////////////////////////////////////////////////////////////// PUBLIC ///////////////////////////////////////////////////////////////////////////////

/// Decode a pickle byte stream.
pub fn from_bytes(data: &[u8]) -> Result<PickleValue> {
    Unpickler::new(data).load()
}

/// Encode a value as a protocol 2 pickle, readable by python 2 and 3.
pub fn to_bytes(value: &PickleValue) -> Result<Vec<u8>> {
    let mut out = vec![op::PROTO, 2];
    write_value(value, &mut out)?;
    out.push(op::STOP);
    Ok(out)
}

fn write_global(module: &str, name: &str, out: &mut Vec<u8>) {
    out.push(op::GLOBAL);
    out.extend_from_slice(module.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(name.as_bytes());
    out.push(b'\n');
}

fn write_str(s: &str, out: &mut Vec<u8>) {
    out.push(op::BINUNICODE);
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_int(i: i64, out: &mut Vec<u8>) {
    if (0..=0xff).contains(&i) {
        out.push(op::BININT1);
        out.push(i as u8);
    } else if (0..=0xffff).contains(&i) {
        out.push(op::BININT2);
        out.extend_from_slice(&(i as u16).to_le_bytes());
    } else if i32::try_from(i).is_ok() {
        out.push(op::BININT);
        out.extend_from_slice(&(i as i32).to_le_bytes());
    } else {
        out.push(op::LONG1);
        out.push(8);
        out.extend_from_slice(&i.to_le_bytes());
    }
}

/// Protocol 2 has no bytes opcode, python encodes them through `_codecs.encode`.
fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    write_global("_codecs", "encode", out);
    write_str(&latin1_to_string(bytes), out);
    write_str("latin1", out);
    out.push(op::TUPLE2);
    out.push(op::REDUCE);
}

fn write_items(items: &[PickleValue], out: &mut Vec<u8>) -> Result<()> {
    for item in items {
        write_value(item, out)?;
    }
    Ok(())
}

fn write_dtype(dtype: &DType, out: &mut Vec<u8>) {
    write_global("numpy", "dtype", out);
    write_str(&dtype.code(), out);
    out.push(op::NEWFALSE);
    out.push(op::NEWTRUE);
    out.push(op::TUPLE3);
    out.push(op::REDUCE);
    out.push(op::MARK);
    write_int(3, out);
    write_str(dtype.byte_order_char(), out);
    out.push(op::NONE);
    out.push(op::NONE);
    out.push(op::NONE);
    write_int(-1, out);
    write_int(-1, out);
    write_int(0, out);
    out.push(op::TUPLE);
    out.push(op::BUILD);
}

fn write_ndarray(arr: &NdArray, out: &mut Vec<u8>) -> Result<()> {
    write_global("numpy.core.multiarray", "_reconstruct", out);
    write_global("numpy", "ndarray", out);
    write_int(0, out);
    out.push(op::TUPLE1);
    write_bytes(b"b", out);
    out.push(op::TUPLE3);
    out.push(op::REDUCE);

    let mut raw = Vec::with_capacity(arr.data.len() * arr.dtype.size);
    let dtype = DType {
        byte_order: if arr.dtype.size == 1 {
            ByteOrder::NotApplicable
        } else {
            ByteOrder::Little
        },
        ..arr.dtype.clone()
    };
    for &value in &arr.data {
        dtype.write(value, &mut raw)?;
    }

    out.push(op::MARK);
    write_int(1, out);
    let shape: Vec<PickleValue> = arr.shape.iter().map(|&n| PickleValue::Int(n as i64)).collect();
    write_value(&PickleValue::Tuple(shape), out)?;
    write_dtype(&dtype, out);
    out.push(op::NEWFALSE);
    write_bytes(&raw, out);
    out.push(op::TUPLE);
    out.push(op::BUILD);
    Ok(())
}

fn write_value(value: &PickleValue, out: &mut Vec<u8>) -> Result<()> {
    match value {
        PickleValue::None => out.push(op::NONE),
        PickleValue::Bool(true) => out.push(op::NEWTRUE),
        PickleValue::Bool(false) => out.push(op::NEWFALSE),
        PickleValue::Int(i) => write_int(*i, out),
        PickleValue::Float(f) => {
            out.push(op::BINFLOAT);
            out.extend_from_slice(&f.to_be_bytes());
        }
        PickleValue::Str(s) => write_str(s, out),
        PickleValue::Bytes(b) => write_bytes(b, out),
        PickleValue::List(items) => {
            out.push(op::EMPTY_LIST);
            if !items.is_empty() {
                out.push(op::MARK);
                write_items(items, out)?;
                out.push(op::APPENDS);
            }
        }
        PickleValue::Tuple(items) => match items.len() {
            0 => out.push(op::EMPTY_TUPLE),
            1..=3 => {
                write_items(items, out)?;
                out.push(op::TUPLE1 + items.len() as u8 - 1);
            }
            _ => {
                out.push(op::MARK);
                write_items(items, out)?;
                out.push(op::TUPLE);
            }
        },
        PickleValue::Set(items) => {
            write_global("__builtin__", "set", out);
            write_value(&PickleValue::List(items.clone()), out)?;
            out.push(op::TUPLE1);
            out.push(op::REDUCE);
        }
        PickleValue::Dict(items) => {
            out.push(op::EMPTY_DICT);
            if !items.is_empty() {
                out.push(op::MARK);
                for (k, v) in items {
                    write_value(k, out)?;
                    write_value(v, out)?;
                }
                out.push(op::SETITEMS);
            }
        }
        PickleValue::Global { module, name } => write_global(module, name, out),
        PickleValue::Object {
            module,
            name,
            args,
            state,
        } => {
            write_global(module, name, out);
            write_value(&PickleValue::Tuple(args.clone()), out)?;
            out.push(op::REDUCE);
            if let Some(state) = state {
                write_value(state, out)?;
                out.push(op::BUILD);
            }
        }
        PickleValue::DType(dtype) => write_dtype(dtype, out),
        PickleValue::NdArray(arr) => write_ndarray(arr, out)?,
        PickleValue::MemoRef(key) => {
            return Err(Error::Pickle(format!("can't write unresolved memo reference {key}")))
        }
    }
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
