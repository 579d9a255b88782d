use crate::dataflow::{log_fact, Dataflow, DataflowAnalysis};
use crate::controlflow::BlockId;

// One visit of a block in a backward analysis: the start fact (end of the
// block in program order) is the meet of the facts flowing back from the
// normal successors, and the instructions are transferred in reverse
// order.
//
// Exception successors are merged into the result fact (beginning of the
// block): the throwing instruction is alone in its block and raises the
// exception before having any effect. A block without normal successors
// (`athrow`) also starts from its exception successors.
pub(super) fn visit_block<A: DataflowAnalysis>(
    df: &mut Dataflow<A>,
    id: BlockId,
) -> Result<bool, A::Error> {
    let cfg = df.cfg;
    let block = cfg.block(id);
    log::debug!("    ---- block@{}", id.index());

    let succs = cfg.outgoing_edges(id);
    let mut start = df.analysis.create_fact();
    if id == cfg.exit() {
        df.analysis.init_entry_fact(&mut start)?;
    } else {
        df.analysis.make_fact_top(&mut start);
        let throw_only = succs.iter().all(|e| e.is_exception());
        for edge in succs.iter().filter(|e| throw_only || !e.is_exception()) {
            if let Some(succ) = df.result_facts.get(&edge.target) {
                let mut fact = succ.clone();
                df.analysis.edge_transfer(edge, &mut fact)?;
                df.analysis.meet_into(&fact, edge, &mut start)?;
            }
        }
    }
    log_fact("EXIT STATE", &start);

    let mut result = start.clone();
    df.transfer_instructions(id, block.rev_instructions(), &mut result)?;

    for edge in succs.iter().filter(|e| e.is_exception()) {
        if let Some(succ) = df.result_facts.get(&edge.target) {
            let mut fact = succ.clone();
            df.analysis.edge_transfer(edge, &mut fact)?;
            df.analysis.meet_into(&fact, edge, &mut result)?;
        }
    }
    log_fact("ENTRY STATE", &result);
    log::debug!("");

    Ok(df.update_block(id, start, result))
}
