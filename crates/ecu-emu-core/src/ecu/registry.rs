use super::EcuState;

/// Ordered collection of emulated ECUs. The index is the addressing unit:
/// 11-bit physical request `0x7E0 + n` targets ECU `n`.
#[derive(Debug, Clone, Default)]
pub struct EcuRegistry {
    ecus: Vec<EcuState>,
}

impl EcuRegistry {
    pub fn new(ecus: Vec<EcuState>) -> Self {
        Self { ecus }
    }

    /// ECM at index 0, TCM at index 1.
    pub fn with_defaults() -> Self {
        Self::new(vec![EcuState::default_ecm(), EcuState::default_tcm()])
    }

    /// Append an ECU; it takes the next addressing index.
    pub fn push(&mut self, ecu: EcuState) -> usize {
        self.ecus.push(ecu);
        self.ecus.len() - 1
    }

    pub fn len(&self) -> usize {
        self.ecus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ecus.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EcuState> {
        self.ecus.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut EcuState> {
        self.ecus.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EcuState> {
        self.ecus.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EcuState> {
        self.ecus.iter_mut()
    }

    /// Index of the ECU owning a 29-bit target address byte.
    pub fn index_by_target_address(&self, target: u8) -> Option<usize> {
        self.ecus.iter().position(|ecu| ecu.target_address() == target)
    }

    pub fn index_by_name(&self, name: &str) -> Option<usize> {
        self.ecus
            .iter()
            .position(|ecu| ecu.name.eq_ignore_ascii_case(name))
    }
}
