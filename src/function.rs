use std::collections::HashMap;

use crate::quadruple::{Quadruple, VarType};

/// One compiled function: its IR body plus the signature facts the backend
/// cares about. Parameter and local names are stored undecorated.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub result_type: Option<VarType>,
    pub params: Vec<(String, VarType)>,
    pub local_vars: HashMap<String, VarType>,
    pub instructions: Vec<Quadruple>,
    pub attributes: Vec<String>,
}

impl Function {
    pub fn new(name: String, result_type: Option<VarType>, attributes: Vec<String>) -> Function {
        Function {
            name,
            result_type,
            params: Vec::new(),
            local_vars: HashMap::new(),
            instructions: Vec::new(),
            attributes,
        }
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}
