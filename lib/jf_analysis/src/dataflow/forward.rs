use crate::dataflow::{log_fact, Dataflow, DataflowAnalysis};
use crate::controlflow::BlockId;

// One visit of a block in a forward analysis: the start fact is the meet
// of the facts flowing out of the predecessors, the result fact is the
// transfer of the block instructions in program order.
//
// Exception edges carry the start fact of their source block: throwing
// instructions are alone in their block, and the exception is raised
// before the instruction has any effect.
pub(super) fn visit_block<A: DataflowAnalysis>(
    df: &mut Dataflow<A>,
    id: BlockId,
) -> Result<bool, A::Error> {
    let cfg = df.cfg;
    let block = cfg.block(id);
    log::debug!("    ---- block@{}", id.index());

    let mut start = df.analysis.create_fact();
    if id == cfg.entry() {
        df.analysis.init_entry_fact(&mut start)?;
    } else {
        df.analysis.make_fact_top(&mut start);
        for edge in cfg.incoming_edges(id) {
            let pred = if edge.is_exception() {
                df.start_facts.get(&edge.source)
            } else {
                df.result_facts.get(&edge.source)
            };
            if let Some(pred) = pred {
                let mut fact = pred.clone();
                df.analysis.edge_transfer(&edge, &mut fact)?;
                df.analysis.meet_into(&fact, &edge, &mut start)?;
            }
        }
    }
    log_fact("ENTRY STATE", &start);

    let mut result = start.clone();
    df.transfer_instructions(id, block.instructions(), &mut result)?;
    log_fact("EXIT STATE", &result);
    log::debug!("");

    Ok(df.update_block(id, start, result))
}
