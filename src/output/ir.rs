use crate::output::IrConverter;
use crate::quadruple::Quadruple;

/// Emits the canonical IR text form, one quadruple per line (asm blocks span
/// several lines). [`crate::text::TextQuadrupleParser`] reads it back.
pub struct IrDumper;

impl IrConverter for IrDumper {
    fn convert(&self, ir_list: &[Quadruple]) -> String {
        let lines: Vec<String> = ir_list.iter().map(|ir| ir.dump()).collect();
        lines.join("\n")
    }
}
