//! ONNX model Protocol Buffers types.
//!
//! The types in this module correspond to Protocol Buffers messages defined
//! in [onnx.proto](https://github.com/onnx/onnx/blob/main/onnx/onnx.proto3).
//! See the `.proto` file for detailed information on each type and field.
//!
//! These types are not complete. They contain only the messages and fields
//! that the export and inference pipelines in this crate use. Unknown fields
//! are skipped when decoding; fields left at their default values are omitted
//! when encoding.

use crate::protobuf::{Error, Reader, WireType, Writer};

/// Type tag for an [`AttributeProto`] value.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AttributeType(pub i32);

impl AttributeType {
    pub const UNDEFINED: Self = Self(0);
    pub const FLOAT: Self = Self(1);
    pub const INT: Self = Self(2);
    pub const STRING: Self = Self(3);
    pub const FLOATS: Self = Self(6);
    pub const INTS: Self = Self(7);
}

/// Element type of a [`TensorProto`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DataType(pub i32);

impl DataType {
    pub const FLOAT: Self = Self(1);
    pub const UINT8: Self = Self(2);
    pub const INT8: Self = Self(3);
    pub const INT32: Self = Self(6);
    pub const INT64: Self = Self(7);
    pub const BOOL: Self = Self(9);
    pub const DOUBLE: Self = Self(11);
}

/// Read one element (or a packed run of elements) of a repeated `float`
/// field.
fn read_repeated_f32(reader: &mut Reader, wire: WireType, out: &mut Vec<f32>) -> Result<(), Error> {
    match wire {
        WireType::Fixed32 => {
            out.push(reader.read_f32()?);
            Ok(())
        }
        WireType::Len => {
            let bytes = reader.read_bytes()?;
            if bytes.len() % 4 != 0 {
                return Err(Error::InvalidLength);
            }
            for chunk in bytes.chunks_exact(4) {
                out.push(f32::from_le_bytes(chunk.try_into().unwrap()));
            }
            Ok(())
        }
        _ => Err(Error::WrongWireType {
            expected: WireType::Fixed32,
            actual: wire,
        }),
    }
}

/// Read one element (or a packed run of elements) of a repeated `int64`
/// field.
fn read_repeated_i64(reader: &mut Reader, wire: WireType, out: &mut Vec<i64>) -> Result<(), Error> {
    match wire {
        WireType::Varint => {
            out.push(reader.read_int64()?);
            Ok(())
        }
        WireType::Len => {
            let bytes = reader.read_bytes()?;
            let mut inner = Reader::new(bytes);
            while inner.has_remaining() {
                out.push(inner.read_int64()?);
            }
            Ok(())
        }
        _ => Err(Error::WrongWireType {
            expected: WireType::Varint,
            actual: wire,
        }),
    }
}

fn read_message<'a>(reader: &mut Reader<'a>, wire: WireType) -> Result<Reader<'a>, Error> {
    Reader::expect_wire_type(wire, WireType::Len)?;
    reader.read_bytes().map(Reader::new)
}

#[derive(Clone, Debug, Default)]
pub struct AttributeProto {
    pub name: Option<String>,
    pub f: Option<f32>,
    pub i: Option<i64>,
    pub s: Option<String>,
    pub floats: Vec<f32>,
    pub ints: Vec<i64>,
    pub r#type: Option<AttributeType>,
}

impl AttributeProto {
    const NAME: u64 = 1;
    const F: u64 = 2;
    const I: u64 = 3;
    const S: u64 = 4;
    const FLOATS: u64 = 7;
    const INTS: u64 = 8;
    const TYPE: u64 = 20;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::NAME => msg.name = Some(reader.read_string()?),
                Self::F => msg.f = Some(reader.read_f32()?),
                Self::I => msg.i = Some(reader.read_int64()?),
                Self::S => msg.s = Some(reader.read_string()?),
                Self::FLOATS => read_repeated_f32(&mut reader, wire, &mut msg.floats)?,
                Self::INTS => read_repeated_i64(&mut reader, wire, &mut msg.ints)?,
                Self::TYPE => msg.r#type = Some(AttributeType(reader.read_varint()? as i32)),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        if let Some(name) = &self.name {
            w.string_field(Self::NAME, name);
        }
        if let Some(f) = self.f {
            w.float_field(Self::F, f);
        }
        if let Some(i) = self.i {
            w.int64_field(Self::I, i);
        }
        if let Some(s) = &self.s {
            w.string_field(Self::S, s);
        }
        for f in &self.floats {
            w.float_field(Self::FLOATS, *f);
        }
        for i in &self.ints {
            w.int64_field(Self::INTS, *i);
        }
        if let Some(ty) = self.r#type {
            w.varint_field(Self::TYPE, ty.0 as u64);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeProto {
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub name: Option<String>,
    pub op_type: Option<String>,
    pub attribute: Vec<AttributeProto>,
}

impl NodeProto {
    const INPUT: u64 = 1;
    const OUTPUT: u64 = 2;
    const NAME: u64 = 3;
    const OP_TYPE: u64 = 4;
    const ATTRIBUTE: u64 = 5;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::INPUT => msg.input.push(reader.read_string()?),
                Self::OUTPUT => msg.output.push(reader.read_string()?),
                Self::NAME => msg.name = Some(reader.read_string()?),
                Self::OP_TYPE => msg.op_type = Some(reader.read_string()?),
                Self::ATTRIBUTE => msg
                    .attribute
                    .push(AttributeProto::decode(read_message(&mut reader, wire)?)?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        for input in &self.input {
            w.string_field(Self::INPUT, input);
        }
        for output in &self.output {
            w.string_field(Self::OUTPUT, output);
        }
        if let Some(name) = &self.name {
            w.string_field(Self::NAME, name);
        }
        if let Some(op_type) = &self.op_type {
            w.string_field(Self::OP_TYPE, op_type);
        }
        for attr in &self.attribute {
            w.message_field(Self::ATTRIBUTE, |inner| attr.encode(inner));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TensorProto {
    pub dims: Vec<i64>,
    pub data_type: Option<DataType>,
    pub float_data: Vec<f32>,
    pub name: Option<String>,

    /// Tensor data as bytes in packed little-endian order. This is the field
    /// most often used to store data for large tensors.
    pub raw_data: Option<Vec<u8>>,
}

impl TensorProto {
    const DIMS: u64 = 1;
    const DATA_TYPE: u64 = 2;
    const FLOAT_DATA: u64 = 4;
    const NAME: u64 = 8;
    const RAW_DATA: u64 = 9;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::DIMS => read_repeated_i64(&mut reader, wire, &mut msg.dims)?,
                Self::DATA_TYPE => msg.data_type = Some(DataType(reader.read_varint()? as i32)),
                Self::FLOAT_DATA => read_repeated_f32(&mut reader, wire, &mut msg.float_data)?,
                Self::NAME => msg.name = Some(reader.read_string()?),
                Self::RAW_DATA => msg.raw_data = Some(reader.read_bytes()?.to_vec()),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        for dim in &self.dims {
            w.int64_field(Self::DIMS, *dim);
        }
        if let Some(dtype) = self.data_type {
            w.varint_field(Self::DATA_TYPE, dtype.0 as u64);
        }
        for f in &self.float_data {
            w.float_field(Self::FLOAT_DATA, *f);
        }
        if let Some(name) = &self.name {
            w.string_field(Self::NAME, name);
        }
        if let Some(raw) = &self.raw_data {
            w.bytes_field(Self::RAW_DATA, raw);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Dimension {
    pub dim_value: Option<i64>,
    pub dim_param: Option<String>,
}

impl Dimension {
    const DIM_VALUE: u64 = 1;
    const DIM_PARAM: u64 = 2;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::DIM_VALUE => msg.dim_value = Some(reader.read_int64()?),
                Self::DIM_PARAM => msg.dim_param = Some(reader.read_string()?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        if let Some(value) = self.dim_value {
            w.int64_field(Self::DIM_VALUE, value);
        }
        if let Some(param) = &self.dim_param {
            w.string_field(Self::DIM_PARAM, param);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TensorShapeProto {
    pub dim: Vec<Dimension>,
}

impl TensorShapeProto {
    const DIM: u64 = 1;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::DIM => msg
                    .dim
                    .push(Dimension::decode(read_message(&mut reader, wire)?)?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        for dim in &self.dim {
            w.message_field(Self::DIM, |inner| dim.encode(inner));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TypeProtoTensor {
    pub elem_type: Option<DataType>,
    pub shape: Option<TensorShapeProto>,
}

impl TypeProtoTensor {
    const ELEM_TYPE: u64 = 1;
    const SHAPE: u64 = 2;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::ELEM_TYPE => msg.elem_type = Some(DataType(reader.read_varint()? as i32)),
                Self::SHAPE => {
                    msg.shape = Some(TensorShapeProto::decode(read_message(&mut reader, wire)?)?)
                }
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        if let Some(elem_type) = self.elem_type {
            w.varint_field(Self::ELEM_TYPE, elem_type.0 as u64);
        }
        if let Some(shape) = &self.shape {
            w.message_field(Self::SHAPE, |inner| shape.encode(inner));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TypeProto {
    pub tensor_type: Option<TypeProtoTensor>,
}

impl TypeProto {
    const TENSOR_TYPE: u64 = 1;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::TENSOR_TYPE => {
                    msg.tensor_type = Some(TypeProtoTensor::decode(read_message(&mut reader, wire)?)?)
                }
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        if let Some(tensor_type) = &self.tensor_type {
            w.message_field(Self::TENSOR_TYPE, |inner| tensor_type.encode(inner));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ValueInfoProto {
    pub name: Option<String>,
    pub r#type: Option<TypeProto>,
}

impl ValueInfoProto {
    const NAME: u64 = 1;
    const TYPE: u64 = 2;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::NAME => msg.name = Some(reader.read_string()?),
                Self::TYPE => msg.r#type = Some(TypeProto::decode(read_message(&mut reader, wire)?)?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        if let Some(name) = &self.name {
            w.string_field(Self::NAME, name);
        }
        if let Some(ty) = &self.r#type {
            w.message_field(Self::TYPE, |inner| ty.encode(inner));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GraphProto {
    pub node: Vec<NodeProto>,
    pub name: Option<String>,
    pub initializer: Vec<TensorProto>,
    pub input: Vec<ValueInfoProto>,
    pub output: Vec<ValueInfoProto>,
    pub value_info: Vec<ValueInfoProto>,
}

impl GraphProto {
    const NODE: u64 = 1;
    const NAME: u64 = 2;
    const INITIALIZER: u64 = 5;
    const INPUT: u64 = 11;
    const OUTPUT: u64 = 12;
    const VALUE_INFO: u64 = 13;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::NODE => msg
                    .node
                    .push(NodeProto::decode(read_message(&mut reader, wire)?)?),
                Self::NAME => msg.name = Some(reader.read_string()?),
                Self::INITIALIZER => msg
                    .initializer
                    .push(TensorProto::decode(read_message(&mut reader, wire)?)?),
                Self::INPUT => msg
                    .input
                    .push(ValueInfoProto::decode(read_message(&mut reader, wire)?)?),
                Self::OUTPUT => msg
                    .output
                    .push(ValueInfoProto::decode(read_message(&mut reader, wire)?)?),
                Self::VALUE_INFO => msg
                    .value_info
                    .push(ValueInfoProto::decode(read_message(&mut reader, wire)?)?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        for node in &self.node {
            w.message_field(Self::NODE, |inner| node.encode(inner));
        }
        if let Some(name) = &self.name {
            w.string_field(Self::NAME, name);
        }
        for initializer in &self.initializer {
            w.message_field(Self::INITIALIZER, |inner| initializer.encode(inner));
        }
        for input in &self.input {
            w.message_field(Self::INPUT, |inner| input.encode(inner));
        }
        for output in &self.output {
            w.message_field(Self::OUTPUT, |inner| output.encode(inner));
        }
        for value_info in &self.value_info {
            w.message_field(Self::VALUE_INFO, |inner| value_info.encode(inner));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OperatorSetIdProto {
    pub domain: Option<String>,
    pub version: Option<i64>,
}

impl OperatorSetIdProto {
    const DOMAIN: u64 = 1;
    const VERSION: u64 = 2;

    fn decode(mut reader: Reader) -> Result<Self, Error> {
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::DOMAIN => msg.domain = Some(reader.read_string()?),
                Self::VERSION => msg.version = Some(reader.read_int64()?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, w: &mut Writer) {
        if let Some(domain) = &self.domain {
            w.string_field(Self::DOMAIN, domain);
        }
        if let Some(version) = self.version {
            w.int64_field(Self::VERSION, version);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelProto {
    pub ir_version: Option<i64>,
    pub producer_name: Option<String>,
    pub graph: Option<GraphProto>,
    pub opset_import: Vec<OperatorSetIdProto>,
}

impl ModelProto {
    const IR_VERSION: u64 = 1;
    const PRODUCER_NAME: u64 = 2;
    const GRAPH: u64 = 7;
    const OPSET_IMPORT: u64 = 8;

    /// Decode a model from serialized Protocol Buffers data.
    pub fn from_bytes(buf: &[u8]) -> Result<ModelProto, Error> {
        let mut reader = Reader::new(buf);
        let mut msg = Self::default();
        while let Some((field, wire)) = reader.next_field()? {
            match field {
                Self::IR_VERSION => msg.ir_version = Some(reader.read_int64()?),
                Self::PRODUCER_NAME => msg.producer_name = Some(reader.read_string()?),
                Self::GRAPH => msg.graph = Some(GraphProto::decode(read_message(&mut reader, wire)?)?),
                Self::OPSET_IMPORT => msg
                    .opset_import
                    .push(OperatorSetIdProto::decode(read_message(&mut reader, wire)?)?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(msg)
    }

    /// Serialize this model to Protocol Buffers data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(ir_version) = self.ir_version {
            w.int64_field(Self::IR_VERSION, ir_version);
        }
        if let Some(producer_name) = &self.producer_name {
            w.string_field(Self::PRODUCER_NAME, producer_name);
        }
        if let Some(graph) = &self.graph {
            w.message_field(Self::GRAPH, |inner| graph.encode(inner));
        }
        for opset in &self.opset_import {
            w.message_field(Self::OPSET_IMPORT, |inner| opset.encode(inner));
        }
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AttributeProto, AttributeType, DataType, GraphProto, ModelProto, NodeProto, TensorProto,
        ValueInfoProto,
    };

    fn sample_model() -> ModelProto {
        let clip = NodeProto {
            input: vec!["x".to_string()],
            output: vec!["y".to_string()],
            name: Some("Clip_0".to_string()),
            op_type: Some("Clip".to_string()),
            attribute: vec![
                AttributeProto {
                    name: Some("min".to_string()),
                    f: Some(0.0),
                    r#type: Some(AttributeType::FLOAT),
                    ..Default::default()
                },
                AttributeProto {
                    name: Some("max".to_string()),
                    f: Some(6.0),
                    r#type: Some(AttributeType::FLOAT),
                    ..Default::default()
                },
            ],
        };

        let weight = TensorProto {
            dims: vec![2],
            data_type: Some(DataType::FLOAT),
            name: Some("w".to_string()),
            raw_data: Some(
                1.5f32
                    .to_le_bytes()
                    .iter()
                    .chain(2.5f32.to_le_bytes().iter())
                    .copied()
                    .collect(),
            ),
            ..Default::default()
        };

        ModelProto {
            ir_version: Some(7),
            producer_name: Some("cliprt".to_string()),
            graph: Some(GraphProto {
                node: vec![clip],
                name: Some("test".to_string()),
                initializer: vec![weight],
                input: vec![ValueInfoProto {
                    name: Some("x".to_string()),
                    ..Default::default()
                }],
                output: vec![ValueInfoProto {
                    name: Some("y".to_string()),
                    ..Default::default()
                }],
                value_info: Vec::new(),
            }),
            opset_import: Vec::new(),
        }
    }

    #[test]
    fn test_model_roundtrip() {
        let model = sample_model();
        let decoded = ModelProto::from_bytes(&model.to_bytes()).unwrap();

        assert_eq!(decoded.ir_version, Some(7));
        assert_eq!(decoded.producer_name.as_deref(), Some("cliprt"));

        let graph = decoded.graph.unwrap();
        assert_eq!(graph.node.len(), 1);
        assert_eq!(graph.input.len(), 1);
        assert_eq!(graph.output.len(), 1);

        let node = &graph.node[0];
        assert_eq!(node.op_type.as_deref(), Some("Clip"));
        assert_eq!(node.input, vec!["x"]);
        assert_eq!(node.output, vec!["y"]);
        assert_eq!(node.attribute.len(), 2);
        assert_eq!(node.attribute[0].name.as_deref(), Some("min"));
        assert_eq!(node.attribute[0].f, Some(0.0));
        assert_eq!(node.attribute[1].name.as_deref(), Some("max"));
        assert_eq!(node.attribute[1].f, Some(6.0));

        let weight = &graph.initializer[0];
        assert_eq!(weight.dims, vec![2]);
        assert_eq!(weight.data_type, Some(DataType::FLOAT));
        assert_eq!(weight.raw_data.as_deref().map(|b| b.len()), Some(8));
    }

    #[test]
    fn test_decode_empty_model() {
        let model = ModelProto::from_bytes(&[]).unwrap();
        assert!(model.graph.is_none());
        assert!(model.ir_version.is_none());
    }

    #[test]
    fn test_decode_truncated_model() {
        let bytes = sample_model().to_bytes();
        assert!(ModelProto::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }
}
