//! Program dumps for debugging and golden tests.
//!
//! Walks the code linearly (jumps are not followed) and renders every
//! operation with its decoded operands as JSON. Object keys are sorted, so
//! the same program always dumps to the same bytes.

use serde_json::{json, Map, Value};

use crate::binary::operands::decode_operands;
use crate::binary::program::Program;
use crate::binary::reader::{CodeReader, OperandValue};
use crate::error::BytecodeError;
use crate::registry::Registry;

fn operand_json(value: &OperandValue<'_>) -> Result<Value, BytecodeError> {
    Ok(match value {
        OperandValue::Number(n) => json!(n),
        OperandValue::String(s) => json!(s),
        OperandValue::StringList(list) => json!(list.to_vec()?),
        OperandValue::Object(obj) => {
            let mut map = Map::new();
            map.insert(obj.def.class().as_str().into(), json!(obj.def.name));
            if let Some(param) = &obj.param {
                map.insert("param".into(), operand_json(param)?);
            }
            Value::Object(map)
        }
        OperandValue::Flag => Value::Bool(true),
        OperandValue::Offset(target) => json!({ "jump": target }),
    })
}

/// Render `program` as a JSON document.
///
/// # Errors
///
/// [`BytecodeError`] if the code does not decode against `registry`.
pub fn dump(program: &Program, registry: &Registry) -> Result<Value, BytecodeError> {
    let extensions: Vec<Value> = program
        .extensions()
        .iter()
        .map(|(id, name)| json!({ "id": id.0, "name": name }))
        .collect();

    let mut operations = Vec::new();
    let mut reader = CodeReader::new(program.code());
    while !reader.at_end() {
        let offset = reader.position();
        let (ext, opcode) = reader.read_operation()?;
        let entry = registry
            .operation(ext, opcode)
            .ok_or(BytecodeError::UnknownOperation {
                ext: ext.0,
                opcode,
                offset,
            })?;
        let operands = decode_operands(&mut reader, offset, entry, registry)?;

        let mut op = Map::new();
        op.insert("offset".into(), json!(offset));
        op.insert("op".into(), json!(entry.def.mnemonic));
        if !ext.is_core() {
            op.insert("ext".into(), json!(ext.0));
        }
        if let Some(line) = operands.line {
            op.insert("line".into(), json!(line));
        }
        if !operands.optional.is_empty() {
            let mut optional = Map::new();
            for (_, name, value) in operands.optional.iter() {
                optional.insert(name.into(), operand_json(value)?);
            }
            op.insert("optional".into(), Value::Object(optional));
        }
        if !operands.positional.is_empty() {
            let positional = operands
                .positional
                .iter()
                .map(operand_json)
                .collect::<Result<Vec<_>, _>>()?;
            op.insert("positional".into(), Value::Array(positional));
        }
        operations.push(Value::Object(op));
    }

    Ok(json!({
        "extensions": extensions,
        "operations": operations,
    }))
}

/// Pretty-printed [`dump`].
///
/// # Errors
///
/// See [`dump`].
pub fn dump_string(program: &Program, registry: &Registry) -> Result<String, BytecodeError> {
    let value = dump(program, registry)?;
    serde_json::to_string_pretty(&value).map_err(|e| BytecodeError::BadHeader {
        detail: format!("dump serialization: {e}"),
    })
}
