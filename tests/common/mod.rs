//! SOFT fixtures shared by the integration tests.
#![allow(dead_code)]

/// GSE family file: one platform, two samples whose columns come in different orders.
pub const FAMILY: &str = "\
^DATABASE = GeoMiame
!Database_name = Gene Expression Omnibus (GEO)
^PLATFORM = GPL1
!Platform_title = Test chip
!Platform_organism = Homo sapiens
#ID = probe id
#GB_ACC = genbank accession
!platform_table_begin
ID\tGB_ACC
p1\tA1
p2\tA2
p3\tA3
!platform_table_end
^SERIES = GSE1
!Series_title = Two controls
!Series_sample_id = GSM1
!Series_sample_id = GSM2
!Series_platform_id = GPL1
^SAMPLE = GSM1
!Sample_title = control rep1
!Sample_platform_id = GPL1
!Sample_organism_ch1 = Homo sapiens
#ID_REF =
#VALUE = MAS5 signal
#ABS_CALL = detection call
!sample_table_begin
ID_REF\tVALUE\tABS_CALL
p1\t1.5\tP
p2\t2.5\tP
p3\t3.5\tA
!sample_table_end
^SAMPLE = GSM2
!Sample_title = control rep2
!Sample_platform_id = GPL1
!Sample_organism_ch1 = Homo sapiens
#ID_REF =
#ABS_CALL = detection call
#VALUE = MAS5 signal
!sample_table_begin
ID_REF\tABS_CALL\tVALUE
p1\tP\t4.5
p3\tA\t6.5
!sample_table_end
";

/// GDS file curated from [`FAMILY`].
pub const DATASET: &str = "\
^DATABASE = Geo
^DATASET = GDS1
!dataset_title = Two controls, curated
!dataset_platform = GPL1
!dataset_reference_series = GSE1
!dataset_sample_organism = Homo sapiens
^SUBSET = GDS1_1
!subset_dataset_id = GDS1
!subset_description = control
!subset_sample_id = GSM1,GSM2
!subset_type = agent
^DATASET = GDS1
#ID_REF = Platform reference identifier
#IDENTIFIER = identifier
#GSM1 = Value for GSM1: control rep1; src: liver
#GSM2 = Value for GSM2: control rep2; src: liver
!dataset_table_begin
ID_REF\tIDENTIFIER\tGSM1\tGSM2
p1\tg1\t1.5\t4.5
!dataset_table_end
";
