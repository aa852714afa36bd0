use std::collections::BTreeMap;
use std::fmt;

use sp_core::{ScriptPlayError, Value};

/// Host-side extension invoked by Function steps. Receives the resolved
/// `name → value` argument map, returns the value written to the step's
/// result property.
pub type HostFunction =
    Box<dyn Fn(&BTreeMap<String, Value>) -> Result<Value, ScriptPlayError> + Send + Sync>;

/// Per-player table of host functions. Names are trimmed and lowercased; at
/// most one registration per name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, HostFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        function: HostFunction,
    ) -> Result<(), ScriptPlayError> {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return Err(ScriptPlayError::new(
                "REGISTRY_FUNCTION_NAME_EMPTY",
                "Function name is empty",
            ));
        }
        if self.functions.contains_key(&key) {
            return Err(ScriptPlayError::new(
                "REGISTRY_FUNCTION_DUPLICATED",
                format!("Function already registered: {}", key),
            ));
        }
        self.functions.insert(key, function);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.functions.contains_key(&name.trim().to_lowercase())
    }

    pub fn call(
        &self,
        name: &str,
        args: &BTreeMap<String, Value>,
    ) -> Result<Value, ScriptPlayError> {
        let function = self.functions.get(&name.trim().to_lowercase()).ok_or_else(|| {
            ScriptPlayError::new(
                "REGISTRY_FUNCTION_NOT_FOUND",
                format!("Function not registered: {}", name),
            )
        })?;
        function(args)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
